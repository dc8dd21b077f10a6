use serde::{Deserialize, Serialize};

/// Lead form payload accepted by `/lead/submit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lead {
    pub email: String,
    pub site: String,
    #[serde(default)]
    pub telegram: Option<String>,
    #[serde(default)]
    pub keyword: Option<String>,
}

impl Lead {
    /// Checks the fields the form marks as required.
    pub fn validate(&self) -> Result<(), String> {
        if !is_email(self.email.trim()) {
            return Err(format!("'{}' is not a valid email address", self.email));
        }
        if self.site.trim().is_empty() {
            return Err("site must not be empty".to_string());
        }
        Ok(())
    }

    /// Text seeded into the session memory so the agent knows who it is talking to.
    pub fn summary(&self) -> String {
        fn or_none(value: &Option<String>) -> &str {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .unwrap_or("none")
        }

        format!(
            "[About me]\n- Email: {}\n- Telegram: {}\n- Site: {}\n- Keyword: {}",
            self.email.trim(),
            or_none(&self.telegram),
            self.site.trim(),
            or_none(&self.keyword),
        )
    }
}

fn is_email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !value.chars().any(char::is_whitespace)
        && domain
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty() && !tld.ends_with('.'))
}
