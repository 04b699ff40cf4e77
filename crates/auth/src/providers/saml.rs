use super::provisioning::ExternalProfile;
use crate::error::ProviderError;
use async_trait::async_trait;
use authcore_models::SamlConfig;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Claims extracted from a SAML response whose signature has been checked.
#[derive(Debug, Clone)]
pub struct SamlAssertion {
    pub issuer: String,
    pub subject: String,
    pub email: String,
    pub display_name: Option<String>,
    pub audience: Option<String>,
    pub not_on_or_after: Option<DateTime<Utc>>,
}

/// Signature validation of a base64 `SAMLResponse` against the tenant's IdP
/// certificate. Implementations must reject anything they cannot verify.
#[async_trait]
pub trait AssertionVerifier: Send + Sync {
    async fn verify(&self, config: &SamlConfig, saml_response: &str) -> Result<SamlAssertion, ProviderError>;
}

/// Verifier used when no XML signature backend is installed. Every
/// assertion is refused.
pub struct RejectingVerifier;

#[async_trait]
impl AssertionVerifier for RejectingVerifier {
    async fn verify(&self, _config: &SamlConfig, _saml_response: &str) -> Result<SamlAssertion, ProviderError> {
        Err(ProviderError::Assertion(
            "no SAML assertion verifier is configured".to_string(),
        ))
    }
}

/// Conditions every verified assertion must still meet.
pub fn check_assertion(
    config: &SamlConfig,
    assertion: SamlAssertion,
    now: DateTime<Utc>,
) -> Result<ExternalProfile, ProviderError> {
    if assertion.issuer != config.idp_issuer {
        return Err(ProviderError::Assertion(format!("unexpected issuer '{}'", assertion.issuer)));
    }
    if let Some(audience) = &assertion.audience {
        if audience != &config.sp_entity_id {
            return Err(ProviderError::Assertion("assertion is for another audience".to_string()));
        }
    }
    if assertion.not_on_or_after.is_some_and(|deadline| now >= deadline) {
        return Err(ProviderError::Assertion("assertion has expired".to_string()));
    }
    if assertion.subject.is_empty() || !assertion.email.contains('@') {
        return Err(ProviderError::Assertion("assertion lacks subject or email".to_string()));
    }

    Ok(ExternalProfile {
        external_id: assertion.subject,
        email: assertion.email,
        display_name: assertion.display_name,
    })
}

/// IdP redirect carrying an AuthnRequest and the sealed relay state.
pub fn redirect_url(config: &SamlConfig, relay_state: &str) -> String {
    let request = authn_request(config, Utc::now());
    let separator = if config.entry_point.contains('?') { '&' } else { '?' };
    format!(
        "{}{}SAMLRequest={}&RelayState={}",
        config.entry_point,
        separator,
        urlencoding::encode(&STANDARD.encode(request)),
        urlencoding::encode(relay_state),
    )
}

fn authn_request(config: &SamlConfig, issued_at: DateTime<Utc>) -> String {
    format!(
        concat!(
            r#"<samlp:AuthnRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" "#,
            r#"xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" "#,
            r#"ID="_{}" Version="2.0" IssueInstant="{}" Destination="{}" "#,
            r#"ProtocolBinding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST" "#,
            r#"AssertionConsumerServiceURL="{}">"#,
            r#"<saml:Issuer>{}</saml:Issuer>"#,
            r#"</samlp:AuthnRequest>"#
        ),
        Uuid::new_v4().simple(),
        issued_at.format("%Y-%m-%dT%H:%M:%SZ"),
        xml_escape(&config.entry_point),
        xml_escape(&config.acs_url),
        xml_escape(&config.sp_entity_id),
    )
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn config() -> SamlConfig {
        SamlConfig {
            entry_point: "https://idp.example.com/sso".to_string(),
            idp_issuer: "https://idp.example.com".to_string(),
            idp_certificate: "-----BEGIN CERTIFICATE-----".to_string(),
            sp_entity_id: "authcore-sp".to_string(),
            acs_url: "https://app.example.com/auth/saml/callback".to_string(),
        }
    }

    fn assertion() -> SamlAssertion {
        SamlAssertion {
            issuer: "https://idp.example.com".to_string(),
            subject: "saml-user-1".to_string(),
            email: "nurse@clinic.test".to_string(),
            display_name: None,
            audience: Some("authcore-sp".to_string()),
            not_on_or_after: Some(Utc::now() + Duration::minutes(5)),
        }
    }

    #[tokio::test]
    async fn rejecting_verifier_fails_closed() {
        let err = RejectingVerifier.verify(&config(), "PHNhbWw+").await.unwrap_err();
        assert!(matches!(err, ProviderError::Assertion(_)));
    }

    #[test]
    fn assertion_conditions() {
        let now = Utc::now();
        assert_eq!(check_assertion(&config(), assertion(), now).unwrap().external_id, "saml-user-1");

        let mut foreign = assertion();
        foreign.issuer = "https://evil.example.com".to_string();
        assert!(check_assertion(&config(), foreign, now).is_err());

        let mut expired = assertion();
        expired.not_on_or_after = Some(now - Duration::seconds(1));
        assert!(check_assertion(&config(), expired, now).is_err());

        let mut wrong_audience = assertion();
        wrong_audience.audience = Some("other-sp".to_string());
        assert!(check_assertion(&config(), wrong_audience, now).is_err());
    }

    #[test]
    fn redirect_carries_request_and_relay_state() {
        let url = redirect_url(&config(), "sealed+state");
        assert!(url.starts_with("https://idp.example.com/sso?SAMLRequest="));
        assert!(url.ends_with("&RelayState=sealed%2Bstate"));
    }
}
