use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::integrations::{ServiceNowAuth, ServiceNowConfig};
use crate::llm::{LlmConfig, LlmProvider};
use crate::models::ScriptFormat;

const DEFAULT_DATABASE_URL: &str = "sqlite:///./app.db";

/// Process configuration, built once at startup and passed to each component
#[derive(Debug, Clone)]
pub struct Settings {
    pub app_name: String,
    pub database_url: String,

    pub ai_provider: String,
    pub ai_model: String,
    pub anthropic_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub ai_max_tokens: u32,

    pub servicenow_instance: Option<String>,
    pub servicenow_username: Option<String>,
    pub servicenow_password: Option<String>,
    pub servicenow_client_id: Option<String>,
    pub servicenow_client_secret: Option<String>,

    pub sendgrid_api_key: Option<String>,
    pub notification_email_from: String,
    pub product_owner_email: Option<String>,

    pub approval_required: bool,
    pub auto_create_story_on_approval: bool,
    pub test_script_format: String,

    /// Base for links embedded in approval emails
    pub public_base_url: String,
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
    pub server_addr: String,
}

impl Settings {
    /// Load `.env` if present, then read the process environment
    pub fn from_env() -> Self {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!("Loaded environment from {:?}", path);
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; empty values count as unset
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());
        let flag = |key: &str, default: bool| {
            get(key)
                .map(|v| v.trim().eq_ignore_ascii_case("true"))
                .unwrap_or(default)
        };

        Self {
            app_name: or("APP_NAME", "Voice Transcript Test Builder"),
            database_url: or("DATABASE_URL", DEFAULT_DATABASE_URL),
            ai_provider: or("AI_PROVIDER", "anthropic"),
            ai_model: or("AI_MODEL", "claude-3-5-sonnet-20241022"),
            anthropic_api_key: get("ANTHROPIC_API_KEY"),
            openai_api_key: get("OPENAI_API_KEY"),
            ai_max_tokens: get("AI_MAX_TOKENS")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(4096),
            servicenow_instance: get("SERVICENOW_INSTANCE"),
            servicenow_username: get("SERVICENOW_USERNAME"),
            servicenow_password: get("SERVICENOW_PASSWORD"),
            servicenow_client_id: get("SERVICENOW_CLIENT_ID"),
            servicenow_client_secret: get("SERVICENOW_CLIENT_SECRET"),
            sendgrid_api_key: get("SENDGRID_API_KEY"),
            notification_email_from: or("NOTIFICATION_EMAIL_FROM", "noreply@example.com"),
            product_owner_email: get("PRODUCT_OWNER_EMAIL"),
            approval_required: flag("APPROVAL_REQUIRED", true),
            auto_create_story_on_approval: flag("AUTO_CREATE_STORY_ON_APPROVAL", true),
            test_script_format: or("TEST_SCRIPT_FORMAT", "gherkin"),
            public_base_url: or("PUBLIC_BASE_URL", "http://localhost:5000"),
            upload_dir: PathBuf::from(or("UPLOAD_DIR", "uploads")),
            output_dir: PathBuf::from(or("OUTPUT_DIR", "outputs")),
            server_addr: or("SERVER_ADDR", "0.0.0.0:5000"),
        }
    }

    /// Every configuration problem found; empty when usable
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        match self.ai_provider.parse::<LlmProvider>() {
            Ok(LlmProvider::Anthropic) if self.anthropic_api_key.is_none() => {
                errors.push("ANTHROPIC_API_KEY is required when using Anthropic".to_string())
            }
            Ok(LlmProvider::OpenAi) if self.openai_api_key.is_none() => {
                errors.push("OPENAI_API_KEY is required when using OpenAI".to_string())
            }
            Ok(_) => {}
            Err(_) => errors.push(format!("Unsupported AI provider: {}", self.ai_provider)),
        }

        if self.test_script_format.parse::<ScriptFormat>().is_err() {
            errors.push(format!(
                "Unsupported test script format: {}",
                self.test_script_format
            ));
        }

        if self.servicenow_instance.is_none() {
            errors.push("SERVICENOW_INSTANCE is required".to_string());
        }
        if self.servicenow_auth().is_none() {
            errors.push(
                "ServiceNow credentials are required (username/password or client_id/client_secret)"
                    .to_string(),
            );
        }

        errors
    }

    pub fn require_valid(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::ConfigurationInvalid(errors))
        }
    }

    /// Filesystem path behind `DATABASE_URL`
    pub fn database_path(&self) -> PathBuf {
        let url = self.database_url.as_str();
        let path = url
            .strip_prefix("sqlite:///")
            .or_else(|| url.strip_prefix("sqlite://"))
            .unwrap_or(url);
        PathBuf::from(path)
    }

    pub fn script_format(&self) -> Result<ScriptFormat> {
        self.test_script_format.parse()
    }

    pub fn llm_config(&self) -> Result<LlmConfig> {
        let provider: LlmProvider = self.ai_provider.parse()?;
        let api_key = match provider {
            LlmProvider::Anthropic => self.anthropic_api_key.clone(),
            LlmProvider::OpenAi => self.openai_api_key.clone(),
        };
        let api_key = api_key.ok_or_else(|| {
            Error::ConfigurationInvalid(vec![format!("API key for {} is not set", provider)])
        })?;

        Ok(LlmConfig {
            provider,
            api_key,
            model: self.ai_model.clone(),
            max_tokens: self.ai_max_tokens,
        })
    }

    /// Basic credentials win when both pairs are present
    pub fn servicenow_auth(&self) -> Option<ServiceNowAuth> {
        match (
            &self.servicenow_username,
            &self.servicenow_password,
            &self.servicenow_client_id,
            &self.servicenow_client_secret,
        ) {
            (Some(username), Some(password), _, _) => Some(ServiceNowAuth::Basic {
                username: username.clone(),
                password: password.clone(),
            }),
            (_, _, Some(client_id), Some(client_secret)) => {
                Some(ServiceNowAuth::ClientCredentials {
                    client_id: client_id.clone(),
                    client_secret: client_secret.clone(),
                })
            }
            _ => None,
        }
    }

    pub fn servicenow_config(&self) -> Option<ServiceNowConfig> {
        Some(ServiceNowConfig {
            instance: self.servicenow_instance.clone()?,
            auth: self.servicenow_auth()?,
        })
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.server_addr.parse().map_err(|_| {
            Error::ConfigurationInvalid(vec![format!("Invalid SERVER_ADDR: {}", self.server_addr)])
        })
    }

    pub fn create_directories(&self) -> Result<()> {
        for dir in [&self.upload_dir, &self.output_dir] {
            create_dir(dir)?;
        }
        Ok(())
    }
}

fn create_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|source| Error::Io {
        path: dir.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    fn settings(pairs: &[(&str, &str)]) -> Settings {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let s = settings(&[]);
        assert_eq!(s.app_name, "Voice Transcript Test Builder");
        assert_eq!(s.ai_provider, "anthropic");
        assert_eq!(s.ai_max_tokens, 4096);
        assert!(s.approval_required);
        assert!(s.auto_create_story_on_approval);
        assert_eq!(s.script_format().unwrap(), ScriptFormat::Gherkin);
        assert_eq!(s.database_path(), PathBuf::from("./app.db"));
        assert_eq!(s.public_base_url, "http://localhost:5000");
    }

    #[test]
    fn test_flags_only_accept_true() {
        let s = settings(&[("APPROVAL_REQUIRED", "TRUE"), ("AUTO_CREATE_STORY_ON_APPROVAL", "yes")]);
        assert!(s.approval_required);
        assert!(!s.auto_create_story_on_approval);
    }

    #[test]
    fn test_validate_reports_every_problem() {
        let errors = settings(&[("AI_PROVIDER", "openai")]).validate();
        assert_eq!(
            errors,
            vec![
                "OPENAI_API_KEY is required when using OpenAI".to_string(),
                "SERVICENOW_INSTANCE is required".to_string(),
                "ServiceNow credentials are required (username/password or client_id/client_secret)"
                    .to_string(),
            ]
        );
        assert!(matches!(
            settings(&[]).require_valid(),
            Err(Error::ConfigurationInvalid(e)) if e.len() == 3
        ));

        let unknown = settings(&[("AI_PROVIDER", "cohere"), ("TEST_SCRIPT_FORMAT", "xml")]).validate();
        assert!(unknown.contains(&"Unsupported AI provider: cohere".to_string()));
        assert!(unknown.contains(&"Unsupported test script format: xml".to_string()));
    }

    #[test]
    fn test_valid_configuration() {
        let s = settings(&[
            ("ANTHROPIC_API_KEY", "sk-ant"),
            ("SERVICENOW_INSTANCE", "dev1"),
            ("SERVICENOW_CLIENT_ID", "id"),
            ("SERVICENOW_CLIENT_SECRET", "secret"),
        ]);
        assert!(s.require_valid().is_ok());
        assert!(matches!(
            s.servicenow_config().unwrap().auth,
            ServiceNowAuth::ClientCredentials { .. }
        ));
        let llm = s.llm_config().unwrap();
        assert_eq!(llm.provider, LlmProvider::Anthropic);
        assert_eq!(llm.api_key, "sk-ant");
    }

    #[test]
    fn test_basic_auth_preferred() {
        let s = settings(&[
            ("SERVICENOW_USERNAME", "u"),
            ("SERVICENOW_PASSWORD", "p"),
            ("SERVICENOW_CLIENT_ID", "id"),
            ("SERVICENOW_CLIENT_SECRET", "secret"),
        ]);
        assert!(matches!(s.servicenow_auth(), Some(ServiceNowAuth::Basic { .. })));
        assert!(s.servicenow_config().is_none());
    }

    #[test]
    fn test_database_path_variants() {
        assert_eq!(
            settings(&[("DATABASE_URL", "sqlite:////var/lib/app.db")]).database_path(),
            PathBuf::from("/var/lib/app.db")
        );
        assert_eq!(
            settings(&[("DATABASE_URL", "data/app.db")]).database_path(),
            PathBuf::from("data/app.db")
        );
    }

    #[test]
    fn test_create_directories() {
        let dir = tempfile::tempdir().unwrap();
        let upload = dir.path().join("up");
        let output = dir.path().join("out/nested");
        let s = settings(&[
            ("UPLOAD_DIR", upload.to_str().unwrap()),
            ("OUTPUT_DIR", output.to_str().unwrap()),
        ]);
        s.create_directories().unwrap();
        assert!(upload.is_dir());
        assert!(output.is_dir());
    }
}
