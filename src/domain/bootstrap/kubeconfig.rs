/// Points a captured access configuration at the load balancer instead of the loopback
/// API endpoint the service writes by default.
#[derive(Debug, Clone)]
pub struct KubeconfigRewriter {
    loopback: String,
    public: String,
}

impl KubeconfigRewriter {
    /// Both endpoints are `host:port`.
    pub fn new(loopback: impl Into<String>, public: impl Into<String>) -> Self {
        KubeconfigRewriter { loopback: loopback.into(), public: public.into() }
    }

    pub fn apply(&self, raw: &str) -> String {
        rewrite(raw, &self.loopback, &self.public)
    }
}

/// Replaces every occurrence of `loopback` with `public`; everything else is kept byte for byte.
pub fn rewrite(raw: &str, loopback: &str, public: &str) -> String {
    if loopback.is_empty() {
        return raw.to_string();
    }
    raw.replace(loopback, public)
}
