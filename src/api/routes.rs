use std::collections::BTreeSet;

use tracing::warn;

use crate::contract::{HttpMethod, RouteAccess, RouteSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteDomain {
    System,
    Tutor,
}

impl RouteDomain {
    pub fn from_path(path: &str) -> Self {
        if path.starts_with("/tutor") {
            Self::Tutor
        } else {
            Self::System
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDefinition {
    pub spec: RouteSpec,
    pub domain: RouteDomain,
    pub handler_id: String,
}

pub fn route_catalog() -> Vec<RouteDefinition> {
    let mut out = Vec::with_capacity(ROUTES.len());
    let mut seen = BTreeSet::new();

    for (method, path, access) in ROUTES {
        let spec = match RouteSpec::new(*method, *path, *access) {
            Ok(spec) => spec,
            Err(error) => {
                warn!(error = %error, "skipping invalid route");
                continue;
            }
        };
        if !seen.insert((spec.method, spec.path.clone())) {
            warn!(route = %spec, "skipping duplicate route");
            continue;
        }
        out.push(RouteDefinition {
            domain: RouteDomain::from_path(spec.path.as_str()),
            handler_id: handler_id_for(spec.method, spec.path.as_str()),
            spec,
        });
    }

    out
}

/// Access level for a request path; unknown paths require a student.
pub fn access_for_path(path: &str) -> RouteAccess {
    ROUTES
        .iter()
        .find(|(_, route_path, _)| *route_path == path)
        .map_or(RouteAccess::Student, |(_, _, access)| *access)
}

fn handler_id_for(method: HttpMethod, path: &str) -> String {
    let mut tokens = vec![method.as_str().to_ascii_lowercase()];
    for part in path.trim_matches('/').split('/') {
        let normalized = part
            .chars()
            .map(|ch| {
                if ch.is_ascii_alphanumeric() {
                    ch.to_ascii_lowercase()
                } else {
                    '_'
                }
            })
            .collect::<String>();
        tokens.push(normalized);
    }
    tokens.join("_")
}

const ROUTES: &[(HttpMethod, &str, RouteAccess)] = &[
    (HttpMethod::Get, "/health", RouteAccess::Public),
    (HttpMethod::Post, "/tutor", RouteAccess::Student),
    (HttpMethod::Get, "/tutor", RouteAccess::Student),
    (HttpMethod::Get, "/tutor/tools", RouteAccess::Student),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_has_unique_routes_with_stable_handler_ids() {
        let catalog = route_catalog();
        assert_eq!(catalog.len(), ROUTES.len());
        let ids = catalog
            .iter()
            .map(|route| route.handler_id.as_str())
            .collect::<Vec<_>>();
        assert_eq!(
            ids,
            vec!["get_health", "post_tutor", "get_tutor", "get_tutor_tools"]
        );
        assert_eq!(catalog[3].domain, RouteDomain::Tutor);
    }

    #[test]
    fn only_health_is_public() {
        assert_eq!(access_for_path("/health"), RouteAccess::Public);
        assert_eq!(access_for_path("/tutor"), RouteAccess::Student);
        assert_eq!(access_for_path("/anything-else"), RouteAccess::Student);
    }
}
