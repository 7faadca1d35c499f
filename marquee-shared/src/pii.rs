use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Wraps personal data so `{}` and `{:?}` in log macros never print it in full.
///
/// E-mail addresses keep the first character of the local part and the domain
/// (`j*****@example.com`) so support can still correlate deliveries. Anything
/// else is replaced outright. Serialization writes the real value: outbound
/// payloads need it, logs do not.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Masked<T>(pub T);

impl<T> Masked<T> {
    pub fn expose(&self) -> &T {
        &self.0
    }
}

fn redact(value: &str) -> String {
    match value.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {
            let first: String = local.chars().take(1).collect();
            format!("{first}*****@{domain}")
        }
        _ => "********".to_string(),
    }
}

impl<T: AsRef<str>> fmt::Debug for Masked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Masked({})", redact(self.0.as_ref()))
    }
}

impl<T: AsRef<str>> fmt::Display for Masked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&redact(self.0.as_ref()))
    }
}

impl<T: Serialize> Serialize for Masked<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl From<String> for Masked<String> {
    fn from(value: String) -> Self {
        Masked(value)
    }
}
