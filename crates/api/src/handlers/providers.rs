use crate::error::{ApiError, ApiResult};
use crate::AppState;
use authcore_auth::{Credentials, LoginOutcome};
use authcore_models::ProviderKind;
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Default, Deserialize)]
pub struct BeginLoginQuery {
    /// Space-separated OAuth scopes; the tenant's defaults when absent.
    pub scope: Option<String>,
}

/// Callback parameters of either redirect flow. SAML's form field names
/// are accepted as aliases.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    #[serde(alias = "SAMLResponse")]
    pub saml_response: Option<String>,
    #[serde(alias = "RelayState")]
    pub relay_state: Option<String>,
}

impl CallbackParams {
    fn into_credentials(self, kind: ProviderKind) -> Result<Credentials, ApiError> {
        match kind {
            ProviderKind::EnterpriseSso => match (self.code, self.state) {
                (Some(code), Some(state)) => Ok(Credentials::AuthorizationCode { code, state }),
                _ => Err(ApiError::validation("code and state are required")),
            },
            ProviderKind::Saml => match (self.saml_response, self.relay_state) {
                (Some(saml_response), Some(relay_state)) => Ok(Credentials::SamlResponse {
                    saml_response,
                    relay_state,
                }),
                _ => Err(ApiError::validation("samlResponse and relayState are required")),
            },
            ProviderKind::Local => Err(ApiError::validation("local login has no callback")),
        }
    }
}

fn provider_kind(segment: &str) -> Result<ProviderKind, ApiError> {
    ProviderKind::from_route_segment(segment)
        .ok_or_else(|| ApiError::not_found(format!("unknown identity provider '{segment}'")))
}

/// Redirect to the tenant's identity provider
/// GET /auth/:provider/:org_id/login
pub async fn begin_login(
    State(state): State<Arc<AppState>>,
    Path((provider, org_id)): Path<(String, String)>,
    query: Result<Query<BeginLoginQuery>, QueryRejection>,
) -> ApiResult<Response> {
    let kind = provider_kind(&provider)?;
    let Query(query) = query?;
    let scopes: Vec<String> = query
        .scope
        .as_deref()
        .map(|s| s.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default();

    let location = state.sessions.begin_external(kind, &org_id, &scopes).await?;
    Ok((StatusCode::FOUND, [(header::LOCATION, location)]).into_response())
}

/// Finish a redirect login with JSON or SAML POST parameters
/// POST /auth/:provider/callback
pub async fn callback(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    payload: Result<Json<CallbackParams>, JsonRejection>,
) -> ApiResult<Json<LoginOutcome>> {
    let kind = provider_kind(&provider)?;
    let Json(params) = payload?;
    let credentials = params.into_credentials(kind)?;
    Ok(Json(state.sessions.complete_external(kind, credentials).await?))
}

/// Browser redirect back from an OAuth provider
/// GET /auth/:provider/callback
pub async fn callback_redirect(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    query: Result<Query<CallbackParams>, QueryRejection>,
) -> ApiResult<Json<LoginOutcome>> {
    let kind = provider_kind(&provider)?;
    let Query(params) = query?;
    let credentials = params.into_credentials(kind)?;
    Ok(Json(state.sessions.complete_external(kind, credentials).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_params_match_the_provider() {
        let params = CallbackParams {
            code: Some("abc".to_string()),
            state: Some("sealed".to_string()),
            ..CallbackParams::default()
        };
        assert!(matches!(
            params.into_credentials(ProviderKind::EnterpriseSso),
            Ok(Credentials::AuthorizationCode { .. })
        ));

        let params = CallbackParams {
            code: Some("abc".to_string()),
            ..CallbackParams::default()
        };
        assert!(params.into_credentials(ProviderKind::Saml).is_err());
    }

    #[test]
    fn saml_form_names_are_accepted() {
        let params: CallbackParams =
            serde_json::from_str(r#"{"SAMLResponse":"PHNhbWw+","RelayState":"sealed"}"#).unwrap();
        assert!(matches!(
            params.into_credentials(ProviderKind::Saml),
            Ok(Credentials::SamlResponse { .. })
        ));
    }

    #[test]
    fn unknown_provider_segments_are_not_found() {
        assert!(provider_kind("kerberos").is_err());
        assert_eq!(provider_kind("sso").unwrap(), ProviderKind::EnterpriseSso);
    }
}
