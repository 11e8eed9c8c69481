//! Access key pair read from Terraform outputs

use aws_credential_types::Credentials;

/// An IAM access key pair provisioned by the module under test.
///
/// The secret never appears in `Debug` output; these keys end up in logs
/// whenever a probe fails.
#[derive(Clone)]
pub struct AccessKeys {
    access_key_id: String,
    secret_access_key: String,
}

impl AccessKeys {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
        }
    }

    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }

    /// Build static SDK credentials from the pair.
    pub fn to_credentials(&self) -> Credentials {
        Credentials::new(
            self.access_key_id.clone(),
            self.secret_access_key.clone(),
            None,
            None,
            "terraform-output",
        )
    }
}

impl std::fmt::Debug for AccessKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessKeys")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_the_secret() {
        let keys = AccessKeys::new("AKIAEXAMPLE", "very-secret-value");
        let debug = format!("{keys:?}");

        assert!(debug.contains("AKIAEXAMPLE"));
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("very-secret-value"));
    }
}
