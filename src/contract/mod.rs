use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = ContractError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            other => Err(ContractError::UnsupportedHttpMethod(other.to_string())),
        }
    }
}

/// Who may call a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RouteAccess {
    Public,
    Student,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteSpec {
    pub method: HttpMethod,
    pub path: String,
    pub access: RouteAccess,
}

impl RouteSpec {
    pub fn new(
        method: HttpMethod,
        path: impl Into<String>,
        access: RouteAccess,
    ) -> Result<Self, ContractError> {
        let path = path.into();
        if !path.starts_with('/') {
            return Err(ContractError::InvalidRoutePath(path));
        }
        Ok(Self {
            method,
            path,
            access,
        })
    }
}

impl fmt::Display for RouteSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

#[derive(Debug, Error)]
pub enum ContractError {
    #[error("unsupported HTTP method: {0}")]
    UnsupportedHttpMethod(String),

    #[error("route path must start with '/' but was '{0}'")]
    InvalidRoutePath(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_parsing_is_case_insensitive() {
        assert_eq!("post".parse::<HttpMethod>().ok(), Some(HttpMethod::Post));
        assert!("PATCH".parse::<HttpMethod>().is_err());
    }

    #[test]
    fn route_paths_must_be_absolute() {
        assert!(RouteSpec::new(HttpMethod::Get, "tutor", RouteAccess::Student).is_err());
        let spec = RouteSpec::new(HttpMethod::Get, "/tutor", RouteAccess::Student).expect("spec");
        assert_eq!(spec.to_string(), "GET /tutor");
    }
}
