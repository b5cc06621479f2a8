use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use crate::app_state::AppState;
use crate::error::{CoreError, ErrorKind, Result};
use pa_store::{NewTemplate, ParamDef, Template};

#[derive(Debug, Deserialize)]
pub struct ListTemplatesQuery {
  pub category: Option<String>,
}

pub async fn list_templates_handler(
  State(state): State<AppState>,
  Query(query): Query<ListTemplatesQuery>,
) -> Result<Json<Vec<Template>>> {
  Ok(Json(state.store().templates().list(query.category).await?))
}

pub async fn get_template_handler(
  State(state): State<AppState>,
  Path(id): Path<String>,
) -> Result<Json<Template>> {
  let template = state
    .store()
    .templates()
    .get(&id)
    .await?
    .ok_or_else(|| CoreError::new(ErrorKind::NotFound, format!("no template '{id}'")))?;
  Ok(Json(template))
}

#[derive(Debug, Deserialize)]
pub struct CreateTemplateRequest {
  pub name: String,
  pub description: Option<String>,
  pub category: Option<String>,
  pub code: String,
  pub params_schema: Vec<ParamDef>,
  pub required_credentials: Vec<String>,
  pub suggested_schedule: Option<String>,
}

pub async fn create_template_handler(
  State(state): State<AppState>,
  Json(request): Json<CreateTemplateRequest>,
) -> Result<Json<Template>> {
  let template = state
    .store()
    .templates()
    .create(NewTemplate {
      name: request.name,
      description: request.description,
      category: request.category,
      code: request.code,
      params_schema: request.params_schema,
      required_credentials: request.required_credentials,
      suggested_schedule: request.suggested_schedule,
      is_builtin: false,
    })
    .await?;
  Ok(Json(template))
}

#[derive(Debug, Deserialize)]
pub struct UpdateTemplateRequest {
  pub code: Option<String>,
  pub description: Option<String>,
}

pub async fn update_template_handler(
  State(state): State<AppState>,
  Path(id): Path<String>,
  Json(request): Json<UpdateTemplateRequest>,
) -> Result<Json<Template>> {
  let template = state
    .store()
    .templates()
    .update(&id, request.code, request.description)
    .await?;
  Ok(Json(template))
}

pub async fn delete_template_handler(State(state): State<AppState>, Path(id): Path<String>) -> Result<()> {
  state.store().templates().delete(&id).await?;
  Ok(())
}
