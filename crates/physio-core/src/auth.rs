//! Password hashing, login and bearer sessions.
//!
//! Passwords are stored as `pbkdf2-sha256$<iterations>$<salt hex>$<hash hex>`
//! and only ever hashed on the server. Sessions are opaque random tokens
//! kept in the `sessions` table with an expiry.

use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use tracing::info;

use crate::db::{Database, DbError};
use crate::models::{PatientAccess, Session, SessionKind, StaffRole, StaffUser};

type HmacSha256 = Hmac<Sha256>;

const SCHEME: &str = "pbkdf2-sha256";
const SALT_LEN: usize = 16;
const HASH_LEN: usize = 32;

pub const DEFAULT_PBKDF2_ITERATIONS: u32 = 100_000;
pub const DEFAULT_SESSION_TTL_SECS: i64 = 12 * 60 * 60;

/// Authentication errors.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("session is missing, unknown or expired")]
    InvalidSession,

    #[error("stored password hash is malformed")]
    MalformedHash,

    #[error(transparent)]
    Db(#[from] DbError),
}

pub type AuthResult<T> = Result<T, AuthError>;

/// Email and password as submitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

/// Registration payload. The password is hashed before it is stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewStaffUser {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub role: StaffRole,
}

// =========================================================================
// Password hashing
// =========================================================================

fn random_bytes<const N: usize>() -> [u8; N] {
    let mut out = [0u8; N];
    for chunk in out.chunks_mut(16) {
        let bytes = uuid::Uuid::new_v4().into_bytes();
        chunk.copy_from_slice(&bytes[..chunk.len()]);
    }
    out
}

/// PBKDF2-HMAC-SHA256 with a single output block.
fn pbkdf2(password: &[u8], salt: &[u8], iterations: u32) -> AuthResult<[u8; HASH_LEN]> {
    let prf = HmacSha256::new_from_slice(password).map_err(|_| AuthError::MalformedHash)?;

    let mut mac = prf.clone();
    mac.update(salt);
    mac.update(&1u32.to_be_bytes());
    let mut u = [0u8; HASH_LEN];
    u.copy_from_slice(&mac.finalize().into_bytes());
    let mut block = u;

    for _ in 1..iterations {
        let mut mac = prf.clone();
        mac.update(&u);
        u.copy_from_slice(&mac.finalize().into_bytes());
        for (b, x) in block.iter_mut().zip(u.iter()) {
            *b ^= x;
        }
    }
    Ok(block)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Hash a password with a fresh random salt.
pub fn hash_password(password: &str, iterations: u32) -> AuthResult<String> {
    let iterations = iterations.max(1);
    let salt: [u8; SALT_LEN] = random_bytes();
    let hash = pbkdf2(password.as_bytes(), &salt, iterations)?;
    Ok(format!(
        "{SCHEME}${iterations}${}${}",
        hex::encode(salt),
        hex::encode(hash)
    ))
}

/// Check a password against a stored hash in constant time.
pub fn verify_password(password: &str, stored: &str) -> AuthResult<bool> {
    let mut parts = stored.split('$');
    let (Some(SCHEME), Some(iterations), Some(salt), Some(hash), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return Err(AuthError::MalformedHash);
    };
    let iterations: u32 = iterations.parse().map_err(|_| AuthError::MalformedHash)?;
    let salt = hex::decode(salt).map_err(|_| AuthError::MalformedHash)?;
    let expected = hex::decode(hash).map_err(|_| AuthError::MalformedHash)?;
    if iterations == 0 {
        return Err(AuthError::MalformedHash);
    }

    let actual = pbkdf2(password.as_bytes(), &salt, iterations)?;
    Ok(constant_time_eq(&actual, &expected))
}

/// New opaque bearer token.
pub fn generate_token() -> String {
    hex::encode(random_bytes::<32>())
}

// =========================================================================
// Authenticator
// =========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthConfig {
    pub iterations: u32,
    pub session_ttl: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_PBKDF2_ITERATIONS,
            session_ttl: Duration::seconds(DEFAULT_SESSION_TTL_SECS),
        }
    }
}

/// Registration, login and session checks against the database.
#[derive(Debug, Clone, Default)]
pub struct Authenticator {
    config: AuthConfig,
}

impl Authenticator {
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Create a staff account. Duplicate emails are a constraint error.
    pub fn register_staff(&self, db: &Database, new: NewStaffUser) -> AuthResult<StaffUser> {
        let user = StaffUser {
            id: uuid::Uuid::new_v4().to_string(),
            name: new.name,
            email: new.email.trim().to_string(),
            role: new.role,
            password_hash: hash_password(&new.password, self.config.iterations)?,
            created_at: Utc::now().to_rfc3339(),
        };
        db.insert_staff_user(&user)?;
        info!(user_id = %user.id, role = %user.role, "staff user registered");
        Ok(user)
    }

    pub fn login_staff(&self, db: &Database, creds: &Credentials) -> AuthResult<(Session, StaffUser)> {
        let user = db
            .find_staff_user_by_email(creds.email.trim())?
            .ok_or(AuthError::InvalidCredentials)?;
        if !verify_password(&creds.password, &user.password_hash)? {
            return Err(AuthError::InvalidCredentials);
        }
        let session = self.open_session(db, &user.id, SessionKind::Staff)?;
        info!(user_id = %user.id, "staff login");
        Ok((session, user))
    }

    /// Give a patient portal credentials.
    pub fn grant_patient_access(
        &self,
        db: &Database,
        patient_id: &str,
        creds: &Credentials,
    ) -> AuthResult<PatientAccess> {
        let access = PatientAccess {
            patient_id: patient_id.to_string(),
            email: creds.email.trim().to_string(),
            password_hash: hash_password(&creds.password, self.config.iterations)?,
            created_at: Utc::now().to_rfc3339(),
        };
        db.insert_patient_access(&access)?;
        Ok(access)
    }

    pub fn login_patient(
        &self,
        db: &Database,
        creds: &Credentials,
    ) -> AuthResult<(Session, PatientAccess)> {
        let access = db
            .find_patient_access_by_email(creds.email.trim())?
            .ok_or(AuthError::InvalidCredentials)?;
        if !verify_password(&creds.password, &access.password_hash)? {
            return Err(AuthError::InvalidCredentials);
        }
        let session = self.open_session(db, &access.patient_id, SessionKind::Patient)?;
        info!(patient_id = %access.patient_id, "patient portal login");
        Ok((session, access))
    }

    fn open_session(&self, db: &Database, subject_id: &str, kind: SessionKind) -> AuthResult<Session> {
        let now = Utc::now();
        let session = Session {
            token: generate_token(),
            subject_id: subject_id.to_string(),
            kind,
            expires_at: now + self.config.session_ttl,
            created_at: now.to_rfc3339(),
        };
        db.insert_session(&session)?;
        Ok(session)
    }

    /// Resolve a bearer token. Expired sessions are deleted and rejected.
    pub fn validate_session(&self, db: &Database, token: &str) -> AuthResult<Session> {
        let session = db.get_session(token)?.ok_or(AuthError::InvalidSession)?;
        if session.is_expired_at(Utc::now()) {
            db.delete_session(token)?;
            return Err(AuthError::InvalidSession);
        }
        Ok(session)
    }

    /// Whether a session was removed.
    pub fn logout(&self, db: &Database, token: &str) -> AuthResult<bool> {
        Ok(db.delete_session(token)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewPatient;

    fn auth() -> Authenticator {
        Authenticator::new(AuthConfig {
            iterations: 10,
            session_ttl: Duration::hours(1),
        })
    }

    fn register(db: &Database, email: &str) -> AuthResult<StaffUser> {
        auth().register_staff(
            db,
            NewStaffUser {
                name: "Ana".into(),
                email: email.into(),
                password: "correct horse".into(),
                role: StaffRole::Admin,
            },
        )
    }

    #[test]
    fn test_pbkdf2_known_vector() {
        // RFC 7914 section 11, first 32 bytes.
        let out = pbkdf2(b"passwd", b"salt", 1).unwrap();
        assert_eq!(
            hex::encode(out),
            "55ac046e56e3089fec1691c22544b605f94185216dde0465e68b9d57c20dacbc"
        );
    }

    #[test]
    fn test_hash_format_and_verify() {
        let stored = hash_password("s3cret", 5).unwrap();
        let parts: Vec<&str> = stored.split('$').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], "pbkdf2-sha256");
        assert_eq!(parts[1], "5");
        assert_eq!(parts[2].len(), SALT_LEN * 2);
        assert_eq!(parts[3].len(), HASH_LEN * 2);

        assert!(verify_password("s3cret", &stored).unwrap());
        assert!(!verify_password("s3cret!", &stored).unwrap());
        assert_ne!(stored, hash_password("s3cret", 5).unwrap());
        assert!(matches!(
            verify_password("x", "plaintext"),
            Err(AuthError::MalformedHash)
        ));
    }

    #[test]
    fn test_register_and_login() {
        let db = Database::open_in_memory().unwrap();
        let user = register(&db, "ana@clinic.com").unwrap();
        assert!(user.password_hash.starts_with("pbkdf2-sha256$"));

        let err = register(&db, "ANA@clinic.com").unwrap_err();
        assert!(matches!(err, AuthError::Db(DbError::Constraint(_))));

        let (session, logged_in) = auth()
            .login_staff(
                &db,
                &Credentials {
                    email: "ana@clinic.com".into(),
                    password: "correct horse".into(),
                },
            )
            .unwrap();
        assert_eq!(logged_in.id, user.id);
        assert_eq!(session.kind, SessionKind::Staff);
        assert_eq!(
            auth().validate_session(&db, &session.token).unwrap().subject_id,
            user.id
        );

        let bad = auth().login_staff(
            &db,
            &Credentials {
                email: "ana@clinic.com".into(),
                password: "wrong".into(),
            },
        );
        assert!(matches!(bad, Err(AuthError::InvalidCredentials)));
    }

    #[test]
    fn test_expired_and_logged_out_sessions_are_rejected() {
        let db = Database::open_in_memory().unwrap();
        register(&db, "ana@clinic.com").unwrap();
        let creds = Credentials {
            email: "ana@clinic.com".into(),
            password: "correct horse".into(),
        };

        let expired = Authenticator::new(AuthConfig {
            iterations: 10,
            session_ttl: Duration::seconds(-1),
        });
        let (session, _) = expired.login_staff(&db, &creds).unwrap();
        assert!(matches!(
            auth().validate_session(&db, &session.token),
            Err(AuthError::InvalidSession)
        ));
        assert!(db.get_session(&session.token).unwrap().is_none());

        let (session, _) = auth().login_staff(&db, &creds).unwrap();
        assert!(auth().logout(&db, &session.token).unwrap());
        assert!(!auth().logout(&db, &session.token).unwrap());
        assert!(matches!(
            auth().validate_session(&db, "unknown"),
            Err(AuthError::InvalidSession)
        ));
    }

    #[test]
    fn test_patient_portal_login() {
        let db = Database::open_in_memory().unwrap();
        let patient = db
            .insert_patient(NewPatient {
                name: "Bia".into(),
                ..Default::default()
            })
            .unwrap();
        let creds = Credentials {
            email: "bia@mail.com".into(),
            password: "portal-pass".into(),
        };
        auth().grant_patient_access(&db, &patient.id, &creds).unwrap();

        let (session, access) = auth().login_patient(&db, &creds).unwrap();
        assert_eq!(access.patient_id, patient.id);
        assert_eq!(session.kind, SessionKind::Patient);
        assert_eq!(session.subject_id, patient.id);
    }
}
