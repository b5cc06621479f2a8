use chrono::Utc;
use rusqlite::OptionalExtension;

use crate::error::{classify, StoreError};
use crate::models::{NewTemplate, ParamDef, Template};
use crate::Result;

/// Typed access to the `templates` table. See spec §4.1.
pub struct Templates<'a> {
  pub(crate) conn: &'a pa_sqlite::Connection,
}

fn row_to_template(row: &rusqlite::Row) -> rusqlite::Result<Template> {
  let params_schema: String = row.get("params_schema")?;
  let required_credentials: String = row.get("required_credentials")?;

  Ok(Template {
    id: row.get("id")?,
    name: row.get("name")?,
    description: row.get("description")?,
    category: row.get("category")?,
    code: row.get("code")?,
    params_schema: serde_json::from_str(&params_schema).unwrap_or_default(),
    required_credentials: serde_json::from_str(&required_credentials).unwrap_or_default(),
    suggested_schedule: row.get("suggested_schedule")?,
    is_builtin: row.get::<_, i64>("is_builtin")? != 0,
    created_at: row.get("created_at")?,
    updated_at: row.get("updated_at")?,
  })
}

impl<'a> Templates<'a> {
  pub async fn create(&self, new: NewTemplate) -> Result<Template> {
    validate_params_schema(&new.params_schema)?;

    let id = uuid::Uuid::new_v4().to_string();
    let now = Utc::now();
    let params_schema = serde_json::to_string(&new.params_schema)?;
    let required_credentials = serde_json::to_string(&new.required_credentials)?;

    self
      .conn
      .call({
        let id = id.clone();
        move |conn| {
          conn
            .execute(
              "INSERT INTO templates (id, name, description, category, code, params_schema, \
               required_credentials, suggested_schedule, is_builtin, created_at, updated_at) \
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
              rusqlite::params![
                id,
                new.name,
                new.description,
                new.category,
                new.code,
                params_schema,
                required_credentials,
                new.suggested_schedule,
                new.is_builtin as i64,
                now.to_rfc3339(),
                now.to_rfc3339(),
              ],
            )
            .map_err(pa_sqlite::Error::Rusqlite)?;
          Ok(())
        }
      })
      .await
      .map_err(|err| classify(err, &new_template_context(&id)))?;

    self.get(&id).await?.ok_or(StoreError::NotFound)
  }

  pub async fn get(&self, id: &str) -> Result<Option<Template>> {
    let id = id.to_string();
    let row: Option<Template> = self
      .conn
      .call(move |conn| {
        conn
          .query_row("SELECT * FROM templates WHERE id = ?1", [&id], row_to_template)
          .optional()
          .map_err(pa_sqlite::Error::Rusqlite)
      })
      .await?;
    Ok(row)
  }

  pub async fn get_by_name(&self, name: &str) -> Result<Option<Template>> {
    let name = name.to_string();
    let row: Option<Template> = self
      .conn
      .call(move |conn| {
        conn
          .query_row(
            "SELECT * FROM templates WHERE name = ?1",
            [&name],
            row_to_template,
          )
          .optional()
          .map_err(pa_sqlite::Error::Rusqlite)
      })
      .await?;
    Ok(row)
  }

  pub async fn list(&self, category: Option<String>) -> Result<Vec<Template>> {
    self
      .conn
      .call(move |conn| {
        let rows = match &category {
          Some(cat) => {
            let mut stmt = conn
              .prepare("SELECT * FROM templates WHERE category = ?1 ORDER BY name")
              .map_err(pa_sqlite::Error::Rusqlite)?;
            stmt
              .query_map([cat], row_to_template)
              .map_err(pa_sqlite::Error::Rusqlite)?
              .collect::<rusqlite::Result<Vec<_>>>()
              .map_err(pa_sqlite::Error::Rusqlite)?
          }
          None => {
            let mut stmt = conn
              .prepare("SELECT * FROM templates ORDER BY name")
              .map_err(pa_sqlite::Error::Rusqlite)?;
            stmt
              .query_map([], row_to_template)
              .map_err(pa_sqlite::Error::Rusqlite)?
              .collect::<rusqlite::Result<Vec<_>>>()
              .map_err(pa_sqlite::Error::Rusqlite)?
          }
        };
        Ok(rows)
      })
      .await
      .map_err(StoreError::from)
  }

  pub async fn exists(&self, id: &str) -> Result<bool> {
    Ok(self.get(id).await?.is_some())
  }

  pub async fn update(&self, id: &str, code: Option<String>, description: Option<String>) -> Result<Template> {
    let existing = self.get(id).await?.ok_or(StoreError::NotFound)?;
    if existing.is_builtin {
      return Err(StoreError::SchemaMismatch(
        "builtin templates are immutable".into(),
      ));
    }

    let id = id.to_string();
    let now = Utc::now();
    self
      .conn
      .call(move |conn| {
        conn
          .execute(
            "UPDATE templates SET code = COALESCE(?2, code), description = COALESCE(?3, description), \
             updated_at = ?4 WHERE id = ?1",
            rusqlite::params![id, code, description, now.to_rfc3339()],
          )
          .map_err(pa_sqlite::Error::Rusqlite)?;
        Ok(())
      })
      .await?;

    self.get(&existing.id).await?.ok_or(StoreError::NotFound)
  }

  pub async fn delete(&self, id: &str) -> Result<()> {
    let id = id.to_string();
    let affected = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .execute("DELETE FROM templates WHERE id = ?1", [&id])
            .map_err(pa_sqlite::Error::Rusqlite)?,
        )
      })
      .await?;
    if affected == 0 {
      return Err(StoreError::NotFound);
    }
    Ok(())
  }
}

fn validate_params_schema(schema: &[ParamDef]) -> Result<()> {
  let mut seen = std::collections::HashSet::new();
  for p in schema {
    if !seen.insert(&p.name) {
      return Err(StoreError::SchemaMismatch(format!(
        "duplicate param name '{}'",
        p.name
      )));
    }
  }
  Ok(())
}

fn new_template_context(id: &str) -> String {
  format!("templates.id={id}")
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::Store;

  fn new_template(name: &str) -> NewTemplate {
    NewTemplate {
      name: name.to_string(),
      description: None,
      category: Some("demo".to_string()),
      code: "return 1;".to_string(),
      params_schema: vec![],
      required_credentials: vec![],
      suggested_schedule: None,
      is_builtin: false,
    }
  }

  #[tokio::test]
  async fn create_get_and_list_round_trip() {
    let store = Store::open_in_memory().await.unwrap();
    let created = store.templates().create(new_template("greet")).await.unwrap();
    assert_eq!(created.name, "greet");
    assert!(!created.is_builtin);

    let fetched = store.templates().get(&created.id).await.unwrap().unwrap();
    assert_eq!(fetched.id, created.id);

    let by_name = store.templates().get_by_name("greet").await.unwrap().unwrap();
    assert_eq!(by_name.id, created.id);

    let listed = store.templates().list(None).await.unwrap();
    assert_eq!(listed.len(), 1);
    let by_category = store.templates().list(Some("demo".to_string())).await.unwrap();
    assert_eq!(by_category.len(), 1);
    let by_other_category = store.templates().list(Some("other".to_string())).await.unwrap();
    assert!(by_other_category.is_empty());
  }

  #[tokio::test]
  async fn duplicate_name_is_a_unique_violation() {
    let store = Store::open_in_memory().await.unwrap();
    store.templates().create(new_template("greet")).await.unwrap();
    let err = store.templates().create(new_template("greet")).await.unwrap_err();
    assert!(matches!(err, StoreError::UniqueViolation(_)));
  }

  #[tokio::test]
  async fn duplicate_param_name_is_rejected_before_insert() {
    let store = Store::open_in_memory().await.unwrap();
    let mut new = new_template("greet");
    new.params_schema = vec![
      ParamDef {
        name: "n".into(),
        param_type: crate::models::ParamType::Number,
        required: true,
        default: None,
        description: None,
      },
      ParamDef {
        name: "n".into(),
        param_type: crate::models::ParamType::String,
        required: false,
        default: None,
        description: None,
      },
    ];
    let err = store.templates().create(new).await.unwrap_err();
    assert!(matches!(err, StoreError::SchemaMismatch(_)));
  }

  #[tokio::test]
  async fn builtin_templates_are_immutable() {
    let store = Store::open_in_memory().await.unwrap();
    let mut new = new_template("seed");
    new.is_builtin = true;
    let created = store.templates().create(new).await.unwrap();

    let err = store
      .templates()
      .update(&created.id, Some("return 2;".to_string()), None)
      .await
      .unwrap_err();
    assert!(matches!(err, StoreError::SchemaMismatch(_)));
  }

  #[tokio::test]
  async fn update_changes_code_and_bumps_updated_at() {
    let store = Store::open_in_memory().await.unwrap();
    let created = store.templates().create(new_template("greet")).await.unwrap();

    let updated = store
      .templates()
      .update(&created.id, Some("return 2;".to_string()), Some("new desc".to_string()))
      .await
      .unwrap();
    assert_eq!(updated.code, "return 2;");
    assert_eq!(updated.description.as_deref(), Some("new desc"));
  }

  #[tokio::test]
  async fn delete_removes_row_and_rejects_unknown_id() {
    let store = Store::open_in_memory().await.unwrap();
    let created = store.templates().create(new_template("greet")).await.unwrap();

    store.templates().delete(&created.id).await.unwrap();
    assert!(!store.templates().exists(&created.id).await.unwrap());

    let err = store.templates().delete(&created.id).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound));
  }
}
