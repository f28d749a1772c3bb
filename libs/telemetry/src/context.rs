#[derive(Debug, Clone)]
pub struct TelemetryLabels {
    pub tenant: String,
    pub extra: Vec<(String, String)>,
}

impl TelemetryLabels {
    pub fn new(tenant: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            extra: Vec::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.push((key.into(), value.into()));
        self
    }

    pub fn tags(&self) -> Vec<(String, String)> {
        let mut tags = Vec::with_capacity(1 + self.extra.len());
        tags.push(("tenant".into(), self.tenant.clone()));
        for (key, value) in &self.extra {
            tags.push((key.clone(), value.clone()));
        }
        tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_tag_comes_first() {
        let labels = TelemetryLabels::new("t1").with("state", "connected");
        assert_eq!(
            labels.tags(),
            vec![
                ("tenant".to_string(), "t1".to_string()),
                ("state".to_string(), "connected".to_string())
            ]
        );
    }
}
