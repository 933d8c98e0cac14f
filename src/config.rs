//! Typed configuration.
//!
//! Every setting is resolved through one ordered list of sources. The secrets
//! file comes first and the process environment second, so an environment
//! variable is used only when the secrets file does not provide that setting.

use std::collections::HashMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

use crate::error::ConfigError;
use crate::ledger::{LedgerBackend, RemoteSettings};
use crate::mail::{SmtpConfig, SmtpSettings, DEFAULT_SUBJECT};
use crate::pdf::DocumentFormat;
use crate::render::LayoutSource;
use crate::serial::SerialScheme;

/// One configuration key: its environment name and its path in the secrets file.
#[derive(Debug, Clone, Copy)]
pub struct Setting {
    pub env: &'static str,
    pub secret: &'static [&'static str],
}

const fn setting(env: &'static str, secret: &'static [&'static str]) -> Setting {
    Setting { env, secret }
}

pub const HOST: Setting = setting("HOST", &[]);
pub const PORT: Setting = setting("PORT", &[]);
pub const ISSUER_PASSWORD: Setting = setting("ISSUER_PASSWORD", &["password"]);
pub const SMTP_SERVER: Setting = setting("SMTP_SERVER", &["email", "smtp_server"]);
pub const SMTP_PORT: Setting = setting("SMTP_PORT", &["email", "smtp_port"]);
pub const SENDER_EMAIL: Setting = setting("SENDER_EMAIL", &["email", "sender"]);
pub const SENDER_PASSWORD: Setting = setting("SENDER_PASSWORD", &["email", "password"]);
pub const LEDGER_BACKEND: Setting = setting("LEDGER_BACKEND", &["ledger", "backend"]);
pub const LEDGER_PATH: Setting = setting("LEDGER_PATH", &["ledger", "path"]);
pub const GITHUB_TOKEN: Setting = setting("GITHUB_TOKEN", &["github", "token"]);
pub const GITHUB_REPO: Setting = setting("GITHUB_REPO", &["github", "repo"]);
pub const GITHUB_LEDGER_PATH: Setting = setting("GITHUB_LEDGER_PATH", &["github", "file_path"]);
pub const GITHUB_BRANCH: Setting = setting("GITHUB_BRANCH", &["github", "branch"]);
pub const GITHUB_API_URL: Setting = setting("GITHUB_API_URL", &["github", "api_url"]);
pub const DATABASE_URL: Setting = setting("DATABASE_URL", &["database", "url"]);
pub const SERIAL_SCHEME: Setting = setting("SERIAL_SCHEME", &[]);
pub const SERIAL_PREFIX: Setting = setting("SERIAL_PREFIX", &[]);
pub const TEMPLATE_PATH: Setting = setting("TEMPLATE_PATH", &[]);
pub const FONT_PATH: Setting = setting("FONT_PATH", &[]);
pub const LAYOUT_PATH: Setting = setting("LAYOUT_PATH", &[]);
pub const CERTIFICATE_FORMAT: Setting = setting("CERTIFICATE_FORMAT", &[]);
pub const ORGANIZATION_NAME: Setting = setting("ORGANIZATION_NAME", &[]);
pub const EMAIL_SUBJECT: Setting = setting("EMAIL_SUBJECT", &["email", "subject"]);

#[derive(Debug, Clone)]
pub enum Source {
    Secrets(toml::Table),
    Environment(HashMap<String, String>),
}

impl Source {
    pub fn secrets_file(path: &Path) -> Result<Self, ConfigError> {
        let secrets_err = |message: String| ConfigError::Secrets {
            path: path.display().to_string(),
            message,
        };
        let text = std::fs::read_to_string(path).map_err(|e| secrets_err(e.to_string()))?;
        let table = text.parse::<toml::Table>().map_err(|e| secrets_err(e.to_string()))?;
        Ok(Source::Secrets(table))
    }

    pub fn environment() -> Self {
        Source::Environment(std::env::vars().collect())
    }

    fn lookup(&self, setting: &Setting) -> Option<String> {
        match self {
            Source::Environment(vars) => vars.get(setting.env).cloned(),
            Source::Secrets(table) => {
                let (last, parents) = setting.secret.split_last()?;
                let mut current = table;
                for key in parents {
                    current = current.get(*key)?.as_table()?;
                }
                match current.get(*last)? {
                    toml::Value::String(s) => Some(s.clone()),
                    toml::Value::Integer(i) => Some(i.to_string()),
                    toml::Value::Boolean(b) => Some(b.to_string()),
                    _ => None,
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Resolver {
    sources: Vec<Source>,
}

impl Resolver {
    pub fn new(sources: Vec<Source>) -> Self {
        Self { sources }
    }

    /// `.env` is loaded into the environment first; the secrets file named by
    /// `SECRETS_PATH` (default `secrets.toml`) is used when it exists.
    pub fn from_process() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let secrets_path =
            PathBuf::from(std::env::var("SECRETS_PATH").unwrap_or_else(|_| "secrets.toml".to_string()));

        let mut sources = Vec::new();
        if secrets_path.exists() {
            info!(path = %secrets_path.display(), "Using secrets file");
            sources.push(Source::secrets_file(&secrets_path)?);
        }
        sources.push(Source::environment());
        Ok(Self::new(sources))
    }

    /// First non-empty value in source order.
    pub fn get(&self, setting: &Setting) -> Option<String> {
        self.sources
            .iter()
            .filter_map(|s| s.lookup(setting))
            .map(|v| v.trim().to_string())
            .find(|v| !v.is_empty())
    }

    pub fn get_or(&self, setting: &Setting, default: &str) -> String {
        self.get(setting).unwrap_or_else(|| default.to_string())
    }

    pub fn require(&self, setting: &Setting) -> Result<String, ConfigError> {
        self.get(setting).ok_or(ConfigError::Missing(setting.env))
    }

    pub fn parse_or<T>(&self, setting: &Setting, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get(setting) {
            None => Ok(default),
            Some(raw) => raw.parse::<T>().map_err(|e| ConfigError::Invalid {
                key: setting.env,
                message: e.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub access_password: Option<String>,
    pub smtp: SmtpConfig,
    pub ledger: LedgerBackend,
    pub serial_scheme: SerialScheme,
    pub serial_prefix: String,
    pub layout: LayoutSource,
    pub format: DocumentFormat,
    pub organization: String,
    pub subject: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::resolve(&Resolver::from_process()?)
    }

    pub fn resolve(r: &Resolver) -> Result<Self, ConfigError> {
        let layout = LayoutSource {
            layout_path: r.get(&LAYOUT_PATH).map(PathBuf::from),
            template_path: PathBuf::from(r.get_or(&TEMPLATE_PATH, "template.png")),
            font_path: PathBuf::from(r.get_or(&FONT_PATH, "fonts/AlexBrush-Regular.ttf")),
        };

        Ok(Self {
            host: r.get_or(&HOST, "0.0.0.0"),
            port: r.parse_or(&PORT, 5001)?,
            access_password: r.get(&ISSUER_PASSWORD),
            smtp: resolve_smtp(r)?,
            ledger: resolve_ledger(r)?,
            serial_scheme: r.parse_or(&SERIAL_SCHEME, SerialScheme::Counter)?,
            serial_prefix: r.get_or(&SERIAL_PREFIX, "PY"),
            layout,
            format: r.parse_or(&CERTIFICATE_FORMAT, DocumentFormat::Pdf)?,
            organization: r.get_or(&ORGANIZATION_NAME, "Your Organization Name"),
            subject: r.get_or(&EMAIL_SUBJECT, DEFAULT_SUBJECT),
        })
    }
}

fn resolve_smtp(r: &Resolver) -> Result<SmtpConfig, ConfigError> {
    let server = r.get(&SMTP_SERVER);
    let sender_email = r.get(&SENDER_EMAIL);
    let sender_password = r.get(&SENDER_PASSWORD);
    let port: u16 = r.parse_or(&SMTP_PORT, 587)?;

    match (server, sender_email, sender_password) {
        (Some(server), Some(sender_email), Some(sender_password)) => Ok(SmtpConfig::Ready(SmtpSettings {
            server,
            port,
            sender_email,
            sender_password,
        })),
        (server, email, password) => {
            let missing = [
                (server.is_none(), SMTP_SERVER.env),
                (email.is_none(), SENDER_EMAIL.env),
                (password.is_none(), SENDER_PASSWORD.env),
            ]
            .into_iter()
            .filter_map(|(absent, name)| absent.then_some(name))
            .collect();
            Ok(SmtpConfig::Incomplete(missing))
        }
    }
}

fn resolve_ledger(r: &Resolver) -> Result<LedgerBackend, ConfigError> {
    let backend = r.get_or(&LEDGER_BACKEND, "csv").to_ascii_lowercase();
    match backend.as_str() {
        "csv" | "local" => Ok(LedgerBackend::Csv {
            path: PathBuf::from(r.get_or(&LEDGER_PATH, "data/certificates.csv")),
        }),
        "github" | "remote" => Ok(LedgerBackend::GitHub(RemoteSettings {
            token: r.require(&GITHUB_TOKEN)?,
            repo: r.require(&GITHUB_REPO)?,
            path: r.get_or(&GITHUB_LEDGER_PATH, "certificates.csv"),
            branch: r.get(&GITHUB_BRANCH),
            api_url: r.get_or(&GITHUB_API_URL, crate::ledger::DEFAULT_API_URL),
        })),
        "memory" => Ok(LedgerBackend::Memory),
        "postgres" => Ok(LedgerBackend::Postgres {
            database_url: r.require(&DATABASE_URL)?,
        }),
        other => Err(ConfigError::Invalid {
            key: LEDGER_BACKEND.env,
            message: format!("unknown backend '{}'", other),
        }),
    }
}
