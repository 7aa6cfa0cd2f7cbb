//! Allowed-origin check applied before the upgrade.

/// Origins allowed to open a session. Empty allows everything.
#[derive(Clone, Debug, Default)]
pub struct OriginPolicy {
    allowed: Vec<String>,
}

impl OriginPolicy {
    /// Policy over `allowed`; entries are compared without trailing slashes.
    pub fn new<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allowed: allowed
                .into_iter()
                .map(|o| normalize(o.as_ref()).to_owned())
                .filter(|o| !o.is_empty())
                .collect(),
        }
    }

    /// Whether every origin is accepted.
    pub fn is_open(&self) -> bool {
        self.allowed.is_empty()
    }

    /// Whether a request with this `Origin` header may proceed.
    pub fn allows(&self, origin: Option<&str>) -> bool {
        if self.is_open() {
            return true;
        }
        origin.is_some_and(|o| {
            let o = normalize(o);
            self.allowed.iter().any(|a| a.eq_ignore_ascii_case(o))
        })
    }
}

fn normalize(origin: &str) -> &str {
    origin.trim().trim_end_matches('/')
}
