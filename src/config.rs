use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::client::ClientConfig;
use crate::session::Credentials;

/// Collections published by the DGT CDD catalog.
pub const KNOWN_COLLECTIONS: [&str; 5] = ["LAZ", "MDS-2m", "MDS-50cm", "MDT-2m", "MDT-50cm"];

const RASTER_COLLECTIONS: [&str; 4] = ["MDS-2m", "MDS-50cm", "MDT-2m", "MDT-50cm"];

/// Whether a collection holds raster tiles (as opposed to LiDAR point clouds).
pub fn is_raster_collection(name: &str) -> bool {
    RASTER_COLLECTIONS.contains(&name)
}

/// Fixed endpoints of the portal, its identity provider and its catalog API.
#[derive(Debug, Clone)]
pub struct ServiceEndpoints {
    /// Portal origin; a login is successful once the IdP redirects back under it.
    pub main_site: String,
    /// OpenID Connect protocol base of the Keycloak realm.
    pub auth_base_url: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: String,
    /// STAC-like `POST` search endpoint.
    pub search_url: String,
    /// `id` attribute of the Keycloak login form.
    pub login_form_id: String,
}

impl Default for ServiceEndpoints {
    fn default() -> Self {
        Self {
            main_site: "https://cdd.dgterritorio.gov.pt".to_string(),
            auth_base_url:
                "https://auth.cdd.dgterritorio.gov.pt/realms/dgterritorio/protocol/openid-connect"
                    .to_string(),
            client_id: "aai-oidc-dgt".to_string(),
            redirect_uri: "https://cdd.dgterritorio.gov.pt/auth/callback".to_string(),
            scope: "openid profile email".to_string(),
            search_url: "https://cdd.dgterritorio.gov.pt/dgt-be/v1/search".to_string(),
            login_form_id: "kc-form-login".to_string(),
        }
    }
}

impl ServiceEndpoints {
    /// Endpoints for a deployment where portal, IdP and API share one origin layout.
    pub fn with_base(main_site: &str, auth_base_url: &str, search_url: &str) -> Self {
        let main_site = main_site.trim_end_matches('/').to_string();
        Self {
            redirect_uri: format!("{}/auth/callback", main_site),
            main_site,
            auth_base_url: auth_base_url.trim_end_matches('/').to_string(),
            search_url: search_url.to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Default)]
struct RcConfig {
    username: Option<String>,
    password: Option<String>,
    verify: Option<bool>,
    delay: Option<String>,
    max_area: Option<String>,
    collections: Option<String>,
}

impl RcConfig {
    fn set(&mut self, key: &str, value: &str) {
        let value = Some(value.to_string());
        match key {
            "username" => self.username = value,
            "password" => self.password = value,
            "delay" => self.delay = value,
            "max_area" => self.max_area = value,
            "collections" => self.collections = value,
            _ => {}
        }
    }
}

pub(crate) fn load_config(
    username: Option<String>,
    password: Option<String>,
    verify: Option<bool>,
) -> Result<ClientConfig> {
    let mut username = username.or_else(|| std::env::var("STACDL_USERNAME").ok());
    let mut password = password.or_else(|| std::env::var("STACDL_PASSWORD").ok());
    let env_verify = std::env::var("STACDL_VERIFY").ok().map(|v| v.trim() != "0");

    let rc_candidates = rc_candidates();
    let mut file = RcConfig::default();

    for rc_path in &rc_candidates {
        if rc_path.exists() {
            file = read_rc(rc_path).with_context(|| {
                format!("failed to read configuration file {}", rc_path.display())
            })?;
            if username.is_none() {
                username = file.username.take();
            }
            if password.is_none() {
                password = file.password.take();
            }
            break;
        }
    }

    let username = match username {
        Some(v) => v,
        None => bail!(
            "Missing configuration: username (set STACDL_USERNAME or put `username:` in one of: {})",
            describe_candidates(&rc_candidates)
        ),
    };

    let password = match password {
        Some(v) => v,
        None => bail!(
            "Missing configuration: password (set STACDL_PASSWORD or put `password:` in one of: {})",
            describe_candidates(&rc_candidates)
        ),
    };

    let verify = verify.or(env_verify).or(file.verify).unwrap_or(true);

    let delay = match file.delay.as_deref() {
        Some(v) => Some(parse_seconds(v).context("invalid `delay` in configuration file")?),
        None => None,
    };

    let max_area_km2 = match file.max_area.as_deref() {
        Some(v) => Some(
            v.parse::<f64>()
                .ok()
                .filter(|a| a.is_finite() && *a > 0.0)
                .with_context(|| format!("invalid `max_area` in configuration file: {}", v))?,
        ),
        None => None,
    };

    let collections = file
        .collections
        .as_deref()
        .map(split_list)
        .unwrap_or_default();

    Ok(ClientConfig {
        credentials: Credentials::new(username, password),
        verify,
        delay,
        max_area_km2,
        collections,
    })
}

fn describe_candidates(candidates: &[PathBuf]) -> String {
    if candidates.is_empty() {
        return ".stacdlrc".to_string();
    }
    candidates
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn read_rc(path: &Path) -> Result<RcConfig> {
    let text = std::fs::read_to_string(path)?;
    Ok(parse_rc(&text))
}

fn parse_rc(text: &str) -> RcConfig {
    let mut cfg = RcConfig::default();

    // Support formatting where `password:` is on one line and the value is on the next line.
    let mut pending_key: Option<&str> = None;

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(pk) = pending_key.take() {
            // Continuation value line: bare without a colon, or quoted with anything inside
            if !line.contains(':') || is_quoted(line) {
                cfg.set(pk, strip_quotes(line));
                continue;
            }
        }

        if let Some((k, v)) = line.split_once(':') {
            let k = k.trim();
            let v = strip_quotes(v.trim());
            match k {
                "verify" => {
                    if !v.is_empty() {
                        cfg.verify = Some(v != "0" && !v.eq_ignore_ascii_case("false"));
                    }
                }
                "username" | "password" | "delay" | "max_area" | "collections" => {
                    if !v.is_empty() {
                        cfg.set(k, v);
                    } else {
                        pending_key = Some(k);
                    }
                }
                _ => {}
            }
        }
    }

    cfg
}

fn is_quoted(s: &str) -> bool {
    let s = s.trim();
    s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')))
}

fn strip_quotes(s: &str) -> &str {
    let s = s.trim();
    if is_quoted(s) { &s[1..s.len() - 1] } else { s }
}

pub(crate) fn parse_seconds(s: &str) -> Result<Duration> {
    let secs: f64 = s
        .trim()
        .parse()
        .with_context(|| format!("not a number of seconds: {}", s))?;
    if !secs.is_finite() || secs < 0.0 {
        bail!("delay must be a non-negative number of seconds, got {}", s);
    }
    Ok(Duration::from_secs_f64(secs))
}

pub(crate) fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

fn rc_candidates() -> Vec<PathBuf> {
    // 1) STACDL_RC (explicit)
    // 2) ./.stacdlrc
    // 3) ~/.stacdlrc
    if let Ok(p) = std::env::var("STACDL_RC") {
        return vec![PathBuf::from(p)];
    }

    let mut v = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        v.push(cwd.join(".stacdlrc"));
    }
    if let Some(home) = dirs::home_dir() {
        v.push(home.join(".stacdlrc"));
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rc_with_continuation_lines() {
        let cfg = parse_rc(
            "# portal account\n\
             username: alice@example.pt\n\
             password:\n\
             \"s3cr:et\"\n\
             verify: 0\n\
             delay: 2.5\n\
             max_area: '150'\n\
             collections: MDT-2m, LAZ\n",
        );
        assert_eq!(cfg.username.as_deref(), Some("alice@example.pt"));
        assert_eq!(cfg.password.as_deref(), Some("s3cr:et"));
        assert_eq!(cfg.verify, Some(false));
        assert_eq!(cfg.delay.as_deref(), Some("2.5"));
        assert_eq!(cfg.max_area.as_deref(), Some("150"));
        assert_eq!(cfg.collections.as_deref(), Some("MDT-2m, LAZ"));
    }

    #[test]
    fn continuation_value_without_colon() {
        let cfg = parse_rc("password:\n   'hunter2'\nusername: bob\n");
        assert_eq!(cfg.password.as_deref(), Some("hunter2"));
        assert_eq!(cfg.username.as_deref(), Some("bob"));
    }

    #[test]
    fn unquoted_line_with_colon_is_a_new_key() {
        let cfg = parse_rc("password:\nusername: carol\n");
        assert_eq!(cfg.password, None);
        assert_eq!(cfg.username.as_deref(), Some("carol"));
    }

    #[test]
    fn parse_seconds_rejects_negative() {
        assert_eq!(parse_seconds("1.5").unwrap(), Duration::from_millis(1500));
        assert!(parse_seconds("-1").is_err());
        assert!(parse_seconds("soon").is_err());
    }

    #[test]
    fn split_list_trims_entries() {
        assert_eq!(split_list("LAZ, MDT-2m,,"), vec!["LAZ", "MDT-2m"]);
        assert!(split_list("").is_empty());
    }

    #[test]
    fn raster_collections() {
        assert!(is_raster_collection("MDT-50cm"));
        assert!(!is_raster_collection("LAZ"));
        assert!(KNOWN_COLLECTIONS.iter().filter(|c| is_raster_collection(c)).count() == 4);
    }

    #[test]
    fn endpoints_with_base_trim_slashes() {
        let e = ServiceEndpoints::with_base(
            "http://127.0.0.1:9000/portal/",
            "http://127.0.0.1:9000/realms/test/protocol/openid-connect/",
            "http://127.0.0.1:9000/search",
        );
        assert_eq!(e.main_site, "http://127.0.0.1:9000/portal");
        assert_eq!(e.redirect_uri, "http://127.0.0.1:9000/portal/auth/callback");
        assert!(!e.auth_base_url.ends_with('/'));
        assert_eq!(e.login_form_id, "kc-form-login");
    }
}
