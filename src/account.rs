//! Registration, sign-in and the user profile.
//!
//! Input is validated before anything touches the network. Auth failures are
//! mapped onto notices with an optional follow-up action; profile bookkeeping
//! failures are logged and never block sign-in.

use std::sync::{Arc, OnceLock};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::app_context::AppContext;
use crate::backend::{AuthBackend, AuthUser, ObjectStore, Query, RowStore, Table};
use crate::error::{AppError, BackendError, Remediation};
use crate::session::SessionCache;

pub const AVATAR_BUCKET: &str = "avatars";
pub const AVATAR_MAX_BYTES: usize = 2 * 1024 * 1024;
const AVATAR_TYPES: [&str; 3] = ["image/jpeg", "image/png", "image/gif"];

pub fn validate_email(email: &str) -> bool {
    static EMAIL: OnceLock<Option<regex_lite::Regex>> = OnceLock::new();
    EMAIL
        .get_or_init(|| regex_lite::Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(email))
}

/// Rules for a new password: minimum length, at least one letter and one
/// digit, and a matching confirmation.
pub fn validate_new_password(password: &str, confirm: &str, min_len: usize) -> Result<(), AppError> {
    if password.chars().count() < min_len {
        return Err(AppError::validation(format!(
            "Password must be at least {min_len} characters"
        )));
    }
    if password != confirm {
        return Err(AppError::validation("The two passwords do not match"));
    }
    let has_letter = password.chars().any(|c| c.is_ascii_alphabetic());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    if !has_letter || !has_digit {
        return Err(AppError::validation("Password must contain both letters and digits"));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrengthLevel {
    Weak,
    Medium,
    Strong,
    VeryStrong,
}

impl StrengthLevel {
    pub fn label(self) -> &'static str {
        match self {
            StrengthLevel::Weak => "weak",
            StrengthLevel::Medium => "medium",
            StrengthLevel::Strong => "strong",
            StrengthLevel::VeryStrong => "very strong",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Strength {
    pub score: u8,
    pub level: StrengthLevel,
}

pub fn password_strength(password: &str) -> Strength {
    let len = password.chars().count();
    let mut score: u32 = 0;
    if len >= 8 {
        score += 20;
    }
    if len >= 12 {
        score += 10;
    }
    if password.chars().any(|c| c.is_ascii_lowercase()) {
        score += 15;
    }
    if password.chars().any(|c| c.is_ascii_uppercase()) {
        score += 15;
    }
    if password.chars().any(|c| c.is_ascii_digit()) {
        score += 15;
    }
    if password.chars().any(|c| !c.is_ascii_alphanumeric()) {
        score += 20;
    }
    let score = score.min(100) as u8;
    let level = match score {
        0..=29 => StrengthLevel::Weak,
        30..=59 => StrengthLevel::Medium,
        60..=79 => StrengthLevel::Strong,
        _ => StrengthLevel::VeryStrong,
    };
    Strength { score, level }
}

/// Row of the `users` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub registration_date: Option<String>,
    #[serde(default)]
    pub last_login: Option<String>,
    #[serde(default)]
    pub conversations: i64,
    #[serde(default)]
    pub active_days: i64,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl UserProfile {
    fn fresh(user: &AuthUser, email: &str) -> Self {
        let today = today();
        Self {
            id: user.id.clone(),
            email: Some(email.to_string()),
            name: Some(user.display_name().unwrap_or_else(|| default_display_name(email))),
            registration_date: Some(today.clone()),
            last_login: Some(today),
            conversations: 0,
            active_days: 1,
            avatar_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Registration {
    Complete { user_id: String },
    /// The account exists but its profile row could not be written.
    ProfileNotSaved { user_id: String, warning: String },
}

#[derive(Debug, Clone)]
pub struct SignedIn {
    pub user: AuthUser,
    pub profile: Option<UserProfile>,
}

fn default_display_name(email: &str) -> String {
    let local = email.split('@').next().unwrap_or(email);
    format!("User {local}")
}

fn today() -> String {
    Utc::now().date_naive().to_string()
}

fn map_auth_error(error: BackendError, email: &str) -> AppError {
    let raw = error.message();
    if raw.contains("Email not confirmed") {
        AppError::Auth {
            message: format!(
                "Email not verified. Open the link sent to {email}, then sign in again."
            ),
            remediation: Some(Remediation::ResendVerification {
                email: email.to_string(),
            }),
        }
    } else if raw.contains("Invalid login credentials") {
        AppError::auth("Wrong email or password")
    } else if raw.contains("User already registered") {
        AppError::Auth {
            message: "This email is already registered".to_string(),
            remediation: Some(Remediation::ResetPassword {
                email: email.to_string(),
            }),
        }
    } else {
        AppError::auth(raw)
    }
}

pub struct AccountService {
    auth: Arc<dyn AuthBackend>,
    rows: Arc<dyn RowStore>,
    storage: Arc<dyn ObjectStore>,
    session: SessionCache,
    min_password_len: usize,
    reset_redirect: Option<String>,
}

impl AccountService {
    pub fn new(ctx: &AppContext) -> Self {
        Self {
            auth: Arc::clone(&ctx.backend.auth),
            rows: Arc::clone(&ctx.backend.rows),
            storage: Arc::clone(&ctx.backend.storage),
            session: ctx.session.clone(),
            min_password_len: ctx.config.account.min_password_len,
            reset_redirect: ctx.config.backend.reset_redirect_url.clone(),
        }
    }

    pub fn min_password_len(&self) -> usize {
        self.min_password_len
    }

    pub async fn register(
        &self,
        email: &str,
        password: &str,
        confirm: &str,
    ) -> Result<Registration, AppError> {
        let email = email.trim();
        if !validate_email(email) {
            return Err(AppError::validation("Enter a valid email address"));
        }
        validate_new_password(password, confirm, self.min_password_len)?;

        tracing::info!("Registering {}", email);
        let metadata = json!({
            "name": default_display_name(email),
            "email": email,
            "registrationDate": today(),
        });
        let user = self
            .auth
            .sign_up(email, password, metadata)
            .await
            .map_err(|e| map_auth_error(e, email))?;

        let profile = UserProfile::fresh(&user, email);
        let row = serde_json::to_value(&profile).map_err(BackendError::from)?;
        match self.rows.insert(Table::Users, row).await {
            Ok(_) => Ok(Registration::Complete { user_id: user.id }),
            Err(error) => {
                tracing::error!("Profile row for {} not saved: {}", user.id, error);
                Ok(Registration::ProfileNotSaved {
                    user_id: user.id,
                    warning: "Account created, but the profile could not be saved. \
                              You can still sign in."
                        .to_string(),
                })
            }
        }
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<SignedIn, AppError> {
        let email = email.trim();
        if !validate_email(email) {
            return Err(AppError::validation("Enter a valid email address"));
        }
        if password.chars().count() < self.min_password_len {
            return Err(AppError::validation(format!(
                "Password must be at least {} characters",
                self.min_password_len
            )));
        }

        let session = self
            .auth
            .sign_in(email, password)
            .await
            .map_err(|e| map_auth_error(e, email))?;
        tracing::info!("Signed in as {}", session.user.id);

        let profile = self.touch_profile(&session.user, email).await;
        Ok(SignedIn {
            user: session.user,
            profile,
        })
    }

    /// Bumps `last_login`/`active_days`, creating the profile row when it is
    /// missing. Failures are logged only.
    async fn touch_profile(&self, user: &AuthUser, email: &str) -> Option<UserProfile> {
        let by_id = Query::new().eq("id", &user.id);
        let existing = match self.rows.select(Table::Users, &by_id.clone().limit(1)).await {
            Ok(rows) => rows
                .into_iter()
                .next()
                .and_then(|row| serde_json::from_value::<UserProfile>(row).ok()),
            Err(error) => {
                tracing::warn!("Could not load profile for {}: {}", user.id, error);
                None
            }
        };

        match existing {
            Some(mut profile) => {
                profile.last_login = Some(today());
                profile.active_days += 1;
                let patch = json!({
                    "last_login": profile.last_login,
                    "active_days": profile.active_days,
                });
                if let Err(error) = self.rows.update(Table::Users, &by_id, patch).await {
                    tracing::error!("Failed to update last login: {}", error);
                }
                Some(profile)
            }
            None => {
                let profile = UserProfile::fresh(user, email);
                let row = serde_json::to_value(&profile).ok()?;
                match self.rows.insert(Table::Users, row).await {
                    Ok(_) => Some(profile),
                    Err(error) => {
                        tracing::error!("Failed to create profile for {}: {}", user.id, error);
                        None
                    }
                }
            }
        }
    }

    pub async fn logout(&self) -> Result<(), AppError> {
        self.auth
            .sign_out()
            .await
            .map_err(|e| AppError::auth(format!("Sign-out failed: {}", e.message())))
    }

    pub async fn resend_verification(&self, email: &str) -> Result<(), AppError> {
        self.auth
            .resend_verification(email.trim())
            .await
            .map_err(|e| AppError::auth(format!("Could not resend the verification email: {}", e.message())))
    }

    pub async fn request_password_reset(&self, email: &str) -> Result<(), AppError> {
        let email = email.trim();
        if !validate_email(email) {
            return Err(AppError::validation("Enter a valid email address"));
        }
        self.auth
            .reset_password_for_email(email, self.reset_redirect.as_deref())
            .await
            .map_err(|e| AppError::auth(format!("Password reset failed: {}", e.message())))
    }

    pub async fn update_password(&self, password: &str, confirm: &str) -> Result<(), AppError> {
        validate_new_password(password, confirm, self.min_password_len)?;
        self.auth
            .update_password(password)
            .await
            .map_err(|e| AppError::auth(format!("Password update failed: {}", e.message())))
    }

    fn require_user(&self) -> Result<String, AppError> {
        self.session
            .current_user_id()
            .ok_or_else(|| AppError::auth("Please sign in first"))
    }

    pub async fn load_profile(&self) -> Result<UserProfile, AppError> {
        let user_id = self.require_user()?;
        let rows = self
            .rows
            .select(Table::Users, &Query::new().eq("id", &user_id).limit(1))
            .await?;
        let row = rows
            .into_iter()
            .next()
            .ok_or(BackendError::NotFound { entity: "user profile" })?;
        serde_json::from_value(row).map_err(|e| AppError::Persistence(e.into()))
    }

    pub async fn save_display_name(&self, name: &str) -> Result<(), AppError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::validation("Name cannot be empty"));
        }
        let user_id = self.require_user()?;
        self.rows
            .update(Table::Users, &Query::new().eq("id", &user_id), json!({ "name": name }))
            .await?;
        Ok(())
    }

    /// Uploads a new avatar and returns its public URL.
    pub async fn upload_avatar(&self, file_name: &str, bytes: Vec<u8>) -> Result<String, AppError> {
        let mime = mime_guess::from_path(file_name)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        if !AVATAR_TYPES.contains(&mime.as_str()) {
            return Err(AppError::validation("Avatar must be a JPG, PNG or GIF image"));
        }
        if bytes.len() > AVATAR_MAX_BYTES {
            return Err(AppError::validation("Avatar must be 2 MB or smaller"));
        }
        let user_id = self.require_user()?;

        let ext = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_else(|| "png".to_string());
        let path = format!(
            "user_avatars/{}_{}.{}",
            user_id,
            Utc::now().timestamp_millis(),
            ext
        );

        self.storage
            .upload(AVATAR_BUCKET, &path, bytes, &mime, true)
            .await?;
        let url = self.storage.public_url(AVATAR_BUCKET, &path);
        self.rows
            .update(
                Table::Users,
                &Query::new().eq("id", &user_id),
                json!({ "avatar_url": url }),
            )
            .await?;
        tracing::info!("Avatar updated for {}", user_id);
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_context::testing::{context, TestContext};
    use crate::backend::sqlite::SqliteRowStore;
    use crate::completion::UnconfiguredProvider;
    use crate::config::AppConfig;

    fn setup() -> (AccountService, TestContext, Arc<SqliteRowStore>) {
        let rows = Arc::new(SqliteRowStore::open_in_memory().unwrap());
        let test = context(rows.clone(), Arc::new(UnconfiguredProvider), AppConfig::default());
        (AccountService::new(&test.ctx), test, rows)
    }

    async fn users(rows: &SqliteRowStore) -> Vec<serde_json::Value> {
        rows.select(Table::Users, &Query::new()).await.unwrap()
    }

    #[test]
    fn email_format() {
        assert!(validate_email("a@b.co"));
        assert!(!validate_email("a@b"));
        assert!(!validate_email("a b@c.io"));
        assert!(!validate_email("@c.io"));
    }

    #[test]
    fn strength_levels() {
        assert_eq!(password_strength("abc").level, StrengthLevel::Weak);
        assert_eq!(password_strength("abcdefgh").score, 35);
        assert_eq!(password_strength("abcdefgh").level, StrengthLevel::Medium);
        assert_eq!(password_strength("Abcdefgh1").level, StrengthLevel::Strong);
        let best = password_strength("Abcdefgh1!xyz");
        assert_eq!(best.score, 95);
        assert_eq!(best.level, StrengthLevel::VeryStrong);
    }

    #[test]
    fn new_password_rules() {
        assert!(validate_new_password("short1", "short1", 8).is_err());
        assert!(validate_new_password("abcdefgh", "abcdefgh", 8).is_err());
        assert!(validate_new_password("abcdefg1", "abcdefg2", 8).is_err());
        assert!(validate_new_password("abcdefg1", "abcdefg1", 8).is_ok());
    }

    #[tokio::test]
    async fn invalid_registration_never_reaches_the_backend() {
        let (service, test, rows) = setup();
        let error = service.register("not-an-email", "abcdefg1", "abcdefg1").await.unwrap_err();
        assert!(matches!(error, AppError::Validation(_)));
        let error = service.register("a@b.io", "abcdefg1", "mismatch1").await.unwrap_err();
        assert!(matches!(error, AppError::Validation(_)));
        assert!(test.auth.calls().is_empty());
        assert!(users(&rows).await.is_empty());
    }

    #[tokio::test]
    async fn registration_creates_a_profile_row() {
        let (service, _test, rows) = setup();
        let outcome = service.register("alice@example.com", "abcdefg1", "abcdefg1").await.unwrap();
        assert_eq!(
            outcome,
            Registration::Complete {
                user_id: "uid-alice@example.com".to_string()
            }
        );
        let stored = users(&rows).await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0]["name"], "User alice");
        assert_eq!(stored[0]["active_days"], 1);
    }

    #[tokio::test]
    async fn unconfirmed_email_offers_resend() {
        let (service, test, _rows) = setup();
        *test.auth.sign_in_error.lock().unwrap() = Some(BackendError::http(400, "Email not confirmed"));
        let error = service.login("bob@example.com", "abcdefg1").await.unwrap_err();
        match error {
            AppError::Auth { remediation, .. } => assert_eq!(
                remediation,
                Some(Remediation::ResendVerification {
                    email: "bob@example.com".to_string()
                })
            ),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn wrong_credentials_get_a_plain_notice() {
        let (service, test, _rows) = setup();
        *test.auth.sign_in_error.lock().unwrap() =
            Some(BackendError::http(400, "Invalid login credentials"));
        let error = service.login("bob@example.com", "abcdefg1").await.unwrap_err();
        assert_eq!(error, AppError::auth("Wrong email or password"));
    }

    #[tokio::test]
    async fn login_bumps_active_days() {
        let (service, _test, rows) = setup();
        rows.insert(
            Table::Users,
            json!({ "id": "uid-carol@example.com", "email": "carol@example.com", "active_days": 3 }),
        )
        .await
        .unwrap();

        let signed_in = service.login("carol@example.com", "abcdefg1").await.unwrap();
        assert_eq!(signed_in.profile.unwrap().active_days, 4);
        assert_eq!(users(&rows).await[0]["active_days"], 4);
    }

    #[tokio::test]
    async fn login_creates_missing_profile() {
        let (service, _test, rows) = setup();
        service.login("dave@example.com", "abcdefg1").await.unwrap();
        let stored = users(&rows).await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0]["id"], "uid-dave@example.com");
    }

    #[tokio::test]
    async fn avatar_type_and_size_are_checked_first() {
        let (service, test, _rows) = setup();
        let error = service.upload_avatar("me.bmp", vec![0; 10]).await.unwrap_err();
        assert!(matches!(error, AppError::Validation(_)));
        let error = service
            .upload_avatar("me.png", vec![0; AVATAR_MAX_BYTES + 1])
            .await
            .unwrap_err();
        assert!(matches!(error, AppError::Validation(_)));
        assert!(test.storage.uploads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn avatar_upload_updates_the_profile() {
        let (service, test, rows) = setup();
        rows.insert(Table::Users, json!({ "id": "u1", "email": "u1@example.com" }))
            .await
            .unwrap();

        let url = service.upload_avatar("Me.JPG", vec![1, 2, 3]).await.unwrap();
        assert!(url.starts_with("https://storage.test/avatars/user_avatars/u1_"));
        assert!(url.ends_with(".jpg"));
        assert_eq!(test.storage.uploads.lock().unwrap().len(), 1);
        assert_eq!(users(&rows).await[0]["avatar_url"], url);
    }
}
