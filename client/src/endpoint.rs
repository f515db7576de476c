use std::fmt;

/// Which slot a backend fills in a harness run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Role {
    #[default]
    Primary,
    /// Secondary model used for independent judgment calls
    Auxiliary,
}

impl Role {
    pub fn is_auxiliary(&self) -> bool {
        matches!(self, Role::Auxiliary)
    }
}

/// Immutable identity of a backend instance
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    base_url: String,
    role: Role,
}

impl Endpoint {
    /// Normalize `host` so it always carries a scheme and never a trailing slash
    pub fn new(host: &str, role: Role) -> Self {
        let host = host.trim().trim_matches('/');
        let lowercase = host.to_ascii_lowercase();
        let base_url = match ["http://", "https://"]
            .into_iter()
            .find(|scheme| lowercase.starts_with(*scheme))
        {
            Some(scheme) => format!("{scheme}{}", &host[scheme.len()..]),
            None => format!("http://{host}"),
        };
        Self { base_url, role }
    }

    /// Endpoint for an engine living in this process
    pub fn in_process(role: Role) -> Self {
        Self {
            base_url: String::new(),
            role,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Identifier followed by the base URL, used in error messages
    pub fn location(&self) -> String {
        if self.base_url.is_empty() {
            return self.to_string();
        }
        format!("{self} ({})", self.base_url)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.role {
            Role::Primary => write!(f, "Model backend"),
            Role::Auxiliary => write!(f, "Model backend (auxiliary)"),
        }
    }
}
