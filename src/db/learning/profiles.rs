use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{
    new_id, normalize_optional_text, normalize_required_text, now_iso, LearningRepoError,
    LearningStore,
};

#[derive(Debug, Clone, Serialize)]
pub struct ProfileRecord {
    pub id: String,
    pub full_name: String,
    pub full_name_ar: String,
    pub grade_level: Option<i64>,
    pub preferred_language: String,
    pub role: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpsertProfileInput {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub full_name_ar: Option<String>,
    #[serde(default)]
    pub grade_level: Option<i64>,
    #[serde(default)]
    pub preferred_language: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IssuedAccessToken {
    pub id: String,
    pub profile_id: String,
    pub token: String,
    pub token_prefix: String,
    pub label: String,
    pub created_at: String,
}

impl LearningStore {
    pub fn upsert_profile(
        &self,
        input: UpsertProfileInput,
    ) -> Result<ProfileRecord, LearningRepoError> {
        let full_name = normalize_required_text(input.full_name.as_str(), "full_name")?;
        let role = match normalize_optional_text(input.role.as_deref()).as_deref() {
            None | Some("student") => "student",
            Some("teacher") => "teacher",
            Some("admin") => "admin",
            Some(other) => {
                return Err(LearningRepoError::Validation(format!(
                    "Unsupported role '{other}'"
                )))
            }
        };
        let language = match normalize_optional_text(input.preferred_language.as_deref()).as_deref()
        {
            Some("en") => "en",
            _ => "ar",
        };
        let id = normalize_optional_text(input.id.as_deref()).unwrap_or_else(new_id);

        self.with_connection(|conn| {
            conn.execute(
                "
                INSERT INTO profiles
                  (id, full_name, full_name_ar, grade_level, preferred_language, role, created_at)
                VALUES
                  (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(id) DO UPDATE SET
                  full_name = excluded.full_name,
                  full_name_ar = excluded.full_name_ar,
                  grade_level = excluded.grade_level,
                  preferred_language = excluded.preferred_language,
                  role = excluded.role
            ",
                params![
                    id,
                    full_name,
                    normalize_optional_text(input.full_name_ar.as_deref()),
                    input.grade_level,
                    language,
                    role,
                    now_iso()
                ],
            )?;
            fetch_profile(conn, id.as_str())?.ok_or(LearningRepoError::NotFound)
        })
    }

    pub fn get_profile(&self, profile_id: &str) -> Result<ProfileRecord, LearningRepoError> {
        self.with_connection(|conn| {
            fetch_profile(conn, profile_id)?.ok_or(LearningRepoError::NotFound)
        })
    }

    pub fn issue_access_token(
        &self,
        profile_id: &str,
        label: Option<&str>,
    ) -> Result<IssuedAccessToken, LearningRepoError> {
        let label = normalize_optional_text(label)
            .unwrap_or_default()
            .chars()
            .take(200)
            .collect::<String>();

        self.with_connection(|conn| {
            let profile = fetch_profile(conn, profile_id)?.ok_or(LearningRepoError::NotFound)?;
            let id = new_id();
            let secret = format!(
                "tutor_{}{}",
                uuid::Uuid::new_v4().simple(),
                uuid::Uuid::new_v4().simple()
            );
            let token_prefix = secret.chars().take(12).collect::<String>();
            let created_at = now_iso();
            conn.execute(
                "
                INSERT INTO access_tokens
                  (id, profile_id, token_hash, token_prefix, label, revoked_at, last_used_at, created_at)
                VALUES
                  (?1, ?2, ?3, ?4, ?5, NULL, NULL, ?6)
            ",
                params![
                    id,
                    profile.id,
                    sha256_hex(secret.as_bytes()),
                    token_prefix,
                    label,
                    created_at
                ],
            )?;
            Ok(IssuedAccessToken {
                id,
                profile_id: profile.id,
                token: secret,
                token_prefix,
                label,
                created_at,
            })
        })
    }

    /// Resolves a bearer secret to the owning profile id.
    pub fn validate_access_token(
        &self,
        raw_token: &str,
    ) -> Result<Option<String>, LearningRepoError> {
        let raw = normalize_optional_text(Some(raw_token)).ok_or_else(|| {
            LearningRepoError::Validation(String::from("Authorization token is required"))
        })?;
        let token_hash = sha256_hex(raw.as_bytes());
        self.with_connection(|conn| {
            let found = conn
                .query_row(
                    "
                    SELECT t.id, t.profile_id
                    FROM access_tokens t
                    JOIN profiles p ON p.id = t.profile_id
                    WHERE t.token_hash = ?1 AND t.revoked_at IS NULL
                    LIMIT 1
                ",
                    [token_hash],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
                )
                .optional()?;

            if let Some((token_id, _)) = found.as_ref() {
                let _ = conn.execute(
                    "UPDATE access_tokens SET last_used_at = ?2 WHERE id = ?1",
                    params![token_id, now_iso()],
                );
            }
            Ok(found.map(|(_, profile_id)| profile_id))
        })
    }

    pub fn revoke_access_token(&self, token_id: &str) -> Result<(), LearningRepoError> {
        self.with_connection(|conn| {
            let affected = conn.execute(
                "UPDATE access_tokens SET revoked_at = COALESCE(revoked_at, ?2) WHERE id = ?1",
                params![token_id, now_iso()],
            )?;
            if affected == 0 {
                Err(LearningRepoError::NotFound)
            } else {
                Ok(())
            }
        })
    }
}

pub(super) fn ensure_profile_tables(conn: &Connection) -> Result<(), LearningRepoError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS profiles (
          id TEXT PRIMARY KEY,
          full_name TEXT NOT NULL,
          full_name_ar TEXT,
          grade_level INTEGER,
          preferred_language TEXT NOT NULL DEFAULT 'ar',
          role TEXT NOT NULL DEFAULT 'student',
          created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS access_tokens (
          id TEXT PRIMARY KEY,
          profile_id TEXT NOT NULL,
          token_hash TEXT NOT NULL UNIQUE,
          token_prefix TEXT NOT NULL,
          label TEXT NOT NULL DEFAULT '',
          revoked_at TEXT,
          last_used_at TEXT,
          created_at TEXT NOT NULL,
          FOREIGN KEY(profile_id) REFERENCES profiles(id) ON DELETE CASCADE
        );
    ",
    )?;
    Ok(())
}

pub(super) fn fetch_profile(
    conn: &Connection,
    profile_id: &str,
) -> Result<Option<ProfileRecord>, LearningRepoError> {
    conn.query_row(
        "
        SELECT id, full_name, full_name_ar, grade_level, preferred_language, role, created_at
        FROM profiles
        WHERE id = ?1
        LIMIT 1
    ",
        [profile_id],
        |row| {
            Ok(ProfileRecord {
                id: row.get("id")?,
                full_name: row.get("full_name")?,
                full_name_ar: row
                    .get::<_, Option<String>>("full_name_ar")?
                    .unwrap_or_default(),
                grade_level: row.get("grade_level")?,
                preferred_language: row.get("preferred_language")?,
                role: row.get("role")?,
                created_at: row.get("created_at")?,
            })
        },
    )
    .optional()
    .map_err(LearningRepoError::from)
}

pub(super) fn find_any_teacher_id(conn: &Connection) -> Result<Option<String>, LearningRepoError> {
    conn.query_row(
        "SELECT id FROM profiles WHERE role = 'teacher' ORDER BY created_at ASC, id ASC LIMIT 1",
        [],
        |row| row.get::<_, String>(0),
    )
    .optional()
    .map_err(LearningRepoError::from)
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{byte:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use crate::db::learning::test_support::temp_store;

    use super::*;

    #[test]
    fn issued_token_resolves_to_profile_until_revoked() {
        let store = temp_store();
        let profile = store
            .upsert_profile(UpsertProfileInput {
                full_name: String::from("Sara"),
                grade_level: Some(3),
                ..UpsertProfileInput::default()
            })
            .expect("profile should be created");
        assert_eq!(profile.preferred_language, "ar");
        assert_eq!(profile.role, "student");

        let issued = store
            .issue_access_token(profile.id.as_str(), Some("tablet"))
            .expect("token should be issued");
        assert!(issued.token.starts_with("tutor_"));
        assert_eq!(
            store
                .validate_access_token(issued.token.as_str())
                .expect("lookup should work")
                .as_deref(),
            Some(profile.id.as_str())
        );

        store
            .revoke_access_token(issued.id.as_str())
            .expect("revoke should work");
        assert!(store
            .validate_access_token(issued.token.as_str())
            .expect("lookup should work")
            .is_none());
    }

    #[test]
    fn unknown_role_is_rejected() {
        let store = temp_store();
        let err = store
            .upsert_profile(UpsertProfileInput {
                full_name: String::from("X"),
                role: Some(String::from("janitor")),
                ..UpsertProfileInput::default()
            })
            .expect_err("role should be validated");
        assert_eq!(err.to_string(), "Unsupported role 'janitor'");
    }
}
