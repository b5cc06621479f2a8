use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::error::{CoreError, ErrorKind, Result};
use pa_store::{Credential, CredentialType, NewCredential};

fn validate_name(name: &str) -> Result<()> {
  if name.is_empty() || !name.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_') {
    return Err(CoreError::new(
      ErrorKind::ValidationError,
      format!("invalid credential name '{name}': must match [A-Z0-9_]+"),
    ));
  }
  Ok(())
}

pub async fn list_credentials_handler(State(state): State<AppState>) -> Result<Json<Vec<Credential>>> {
  Ok(Json(state.store().credentials().list().await?))
}

#[derive(Debug, Deserialize)]
pub struct CreateCredentialRequest {
  pub name: String,
  #[serde(rename = "type")]
  pub credential_type: CredentialType,
  pub description: Option<String>,
  pub value: Option<String>,
}

pub async fn create_credential_handler(
  State(state): State<AppState>,
  Json(request): Json<CreateCredentialRequest>,
) -> Result<Json<Credential>> {
  validate_name(&request.name)?;
  let encrypted_value = request
    .value
    .as_deref()
    .map(|v| state.vault().encrypt(v))
    .transpose()
    .map_err(CoreError::from)?;

  let credential = state
    .store()
    .credentials()
    .create(NewCredential {
      name: request.name,
      credential_type: request.credential_type,
      description: request.description,
      encrypted_value,
    })
    .await?;
  Ok(Json(credential))
}

pub async fn delete_credential_handler(State(state): State<AppState>, Path(id): Path<i64>) -> Result<()> {
  let credential = state
    .store()
    .credentials()
    .get(id)
    .await?
    .ok_or_else(|| CoreError::new(ErrorKind::NotFound, format!("no credential {id}")))?;
  let in_use = state.store().credentials().get_in_use().await?;
  if in_use.contains(&credential.name) {
    return Err(CoreError::new(
      ErrorKind::Conflict,
      format!("credential '{}' is in use by a task or its template", credential.name),
    ));
  }
  state.store().credentials().delete(id).await?;
  Ok(())
}

#[derive(Debug, Deserialize)]
pub struct SetCredentialValueRequest {
  pub value: String,
}

#[derive(Debug, Serialize)]
pub struct SetCredentialValueResponse {
  pub has_value: bool,
}

pub async fn set_credential_value_handler(
  State(state): State<AppState>,
  Path(name): Path<String>,
  Json(request): Json<SetCredentialValueRequest>,
) -> Result<Json<SetCredentialValueResponse>> {
  let credential = state
    .store()
    .credentials()
    .get_by_name(&name)
    .await?
    .ok_or_else(|| CoreError::new(ErrorKind::NotFound, format!("no credential '{name}'")))?;

  let encrypted = state.vault().encrypt(&request.value).map_err(CoreError::from)?;
  state.store().credentials().update_value(credential.id, encrypted).await?;
  Ok(Json(SetCredentialValueResponse { has_value: true }))
}

pub async fn clear_credential_value_handler(
  State(state): State<AppState>,
  Path(name): Path<String>,
) -> Result<()> {
  let credential = state
    .store()
    .credentials()
    .get_by_name(&name)
    .await?
    .ok_or_else(|| CoreError::new(ErrorKind::NotFound, format!("no credential '{name}'")))?;
  state.store().credentials().clear_value(credential.id).await?;
  Ok(())
}
