use chrono::Utc;
use rusqlite::OptionalExtension;

use crate::error::{classify, StoreError};
use crate::models::{Credential, CredentialType, NewCredential};
use crate::Result;

/// Typed access to the `credentials` table. Listing never returns `encrypted_value` — only
/// [`Credentials::get_encrypted_values`] does, and that is meant to be called exclusively from
/// the vault crate's injector. See spec §3 "Credential", §4.3.
pub struct Credentials<'a> {
  pub(crate) conn: &'a pa_sqlite::Connection,
}

fn parse_type(s: &str) -> rusqlite::Result<CredentialType> {
  match s {
    "api_key" => Ok(CredentialType::ApiKey),
    "oauth_token" => Ok(CredentialType::OauthToken),
    "env_var" => Ok(CredentialType::EnvVar),
    "secret" => Ok(CredentialType::Secret),
    other => Err(rusqlite::Error::InvalidColumnType(
      0,
      format!("type={other}"),
      rusqlite::types::Type::Text,
    )),
  }
}

fn type_str(t: CredentialType) -> &'static str {
  match t {
    CredentialType::ApiKey => "api_key",
    CredentialType::OauthToken => "oauth_token",
    CredentialType::EnvVar => "env_var",
    CredentialType::Secret => "secret",
  }
}

fn row_to_credential(row: &rusqlite::Row) -> rusqlite::Result<Credential> {
  let credential_type: String = row.get("type")?;
  let encrypted_value: Option<String> = row.get("encrypted_value")?;

  Ok(Credential {
    id: row.get("id")?,
    name: row.get("name")?,
    credential_type: parse_type(&credential_type)?,
    description: row.get("description")?,
    has_value: encrypted_value.is_some(),
    created_at: row.get("created_at")?,
    last_used_at: row.get("last_used_at")?,
  })
}

impl<'a> Credentials<'a> {
  pub async fn create(&self, new: NewCredential) -> Result<Credential> {
    let now = Utc::now();
    let credential_type = type_str(new.credential_type);

    let id = self
      .conn
      .call(move |conn| {
        conn
          .execute(
            "INSERT INTO credentials (name, type, description, encrypted_value, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![new.name, credential_type, new.description, new.encrypted_value, now.to_rfc3339()],
          )
          .map_err(pa_sqlite::Error::Rusqlite)?;
        Ok(conn.last_insert_rowid())
      })
      .await
      .map_err(|err| classify(err, "credentials.name"))?;

    self.get(id).await?.ok_or(StoreError::NotFound)
  }

  pub async fn get(&self, id: i64) -> Result<Option<Credential>> {
    let row = self
      .conn
      .call(move |conn| {
        conn
          .query_row("SELECT * FROM credentials WHERE id = ?1", [id], row_to_credential)
          .optional()
          .map_err(pa_sqlite::Error::Rusqlite)
      })
      .await?;
    Ok(row)
  }

  pub async fn get_by_name(&self, name: &str) -> Result<Option<Credential>> {
    let name = name.to_string();
    let row = self
      .conn
      .call(move |conn| {
        conn
          .query_row(
            "SELECT * FROM credentials WHERE name = ?1",
            [&name],
            row_to_credential,
          )
          .optional()
          .map_err(pa_sqlite::Error::Rusqlite)
      })
      .await?;
    Ok(row)
  }

  pub async fn exists(&self, name: &str) -> Result<bool> {
    Ok(self.get_by_name(name).await?.is_some())
  }

  pub async fn has_value(&self, name: &str) -> Result<bool> {
    Ok(self.get_by_name(name).await?.map(|c| c.has_value).unwrap_or(false))
  }

  pub async fn list(&self) -> Result<Vec<Credential>> {
    self
      .conn
      .call(move |conn| {
        let mut stmt = conn
          .prepare("SELECT * FROM credentials ORDER BY name")
          .map_err(pa_sqlite::Error::Rusqlite)?;
        let rows = stmt
          .query_map([], row_to_credential)
          .map_err(pa_sqlite::Error::Rusqlite)?
          .collect::<rusqlite::Result<Vec<_>>>()
          .map_err(pa_sqlite::Error::Rusqlite)?;
        Ok(rows)
      })
      .await
      .map_err(StoreError::from)
  }

  /// Fetch ciphertext for exactly the credential names requested. Names with no matching row, or
  /// whose value was never set, are simply absent from the returned map — callers (the injector)
  /// classify that absence as missing vs. unset.
  pub async fn get_encrypted_values(
    &self,
    names: Vec<String>,
  ) -> Result<std::collections::HashMap<String, String>> {
    if names.is_empty() {
      return Ok(std::collections::HashMap::new());
    }
    self
      .conn
      .call(move |conn| {
        let placeholders = names.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
          "SELECT name, encrypted_value FROM credentials WHERE name IN ({placeholders}) \
           AND encrypted_value IS NOT NULL"
        );
        let refs: Vec<&dyn rusqlite::ToSql> = names.iter().map(|n| n as &dyn rusqlite::ToSql).collect();
        let mut stmt = conn.prepare(&sql).map_err(pa_sqlite::Error::Rusqlite)?;
        let rows = stmt
          .query_map(refs.as_slice(), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
          })
          .map_err(pa_sqlite::Error::Rusqlite)?
          .collect::<rusqlite::Result<std::collections::HashMap<_, _>>>()
          .map_err(pa_sqlite::Error::Rusqlite)?;
        Ok(rows)
      })
      .await
      .map_err(StoreError::from)
  }

  pub async fn update_value(&self, id: i64, encrypted_value: String) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn
          .execute(
            "UPDATE credentials SET encrypted_value = ?2 WHERE id = ?1",
            rusqlite::params![id, encrypted_value],
          )
          .map_err(pa_sqlite::Error::Rusqlite)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  pub async fn clear_value(&self, id: i64) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn
          .execute("UPDATE credentials SET encrypted_value = NULL WHERE id = ?1", [id])
          .map_err(pa_sqlite::Error::Rusqlite)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  pub async fn update_metadata(
    &self,
    id: i64,
    description: Option<Option<String>>,
  ) -> Result<Credential> {
    if let Some(description) = description {
      self
        .conn
        .call(move |conn| {
          conn
            .execute(
              "UPDATE credentials SET description = ?2 WHERE id = ?1",
              rusqlite::params![id, description],
            )
            .map_err(pa_sqlite::Error::Rusqlite)?;
          Ok(())
        })
        .await?;
    }
    self.get(id).await?.ok_or(StoreError::NotFound)
  }

  /// Stamp `last_used_at` for every name in `names` that resolved to a value, in one write.
  /// Called by the injector right after a successful decrypt, never on a miss.
  pub async fn touch_last_used(&self, names: Vec<String>) -> Result<()> {
    if names.is_empty() {
      return Ok(());
    }
    let now = Utc::now();
    self
      .conn
      .call(move |conn| {
        let placeholders = names.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!("UPDATE credentials SET last_used_at = ? WHERE name IN ({placeholders})");
        let mut refs: Vec<&dyn rusqlite::ToSql> = vec![&now as &dyn rusqlite::ToSql];
        refs.extend(names.iter().map(|n| n as &dyn rusqlite::ToSql));
        conn.execute(&sql, refs.as_slice()).map_err(pa_sqlite::Error::Rusqlite)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Every credential name referenced by a live task, either directly (`tasks.credentials`) or
  /// through its template's `required_credentials` — the set a caller must not delete out from
  /// under a task. See spec §4.1 `getInUse`.
  pub async fn get_in_use(&self) -> Result<std::collections::HashSet<String>> {
    self
      .conn
      .call(move |conn| {
        let mut in_use = std::collections::HashSet::new();

        let mut task_stmt = conn
          .prepare("SELECT credentials FROM tasks")
          .map_err(pa_sqlite::Error::Rusqlite)?;
        let task_rows = task_stmt
          .query_map([], |row| row.get::<_, String>(0))
          .map_err(pa_sqlite::Error::Rusqlite)?
          .collect::<rusqlite::Result<Vec<_>>>()
          .map_err(pa_sqlite::Error::Rusqlite)?;
        for raw in task_rows {
          if let Ok(names) = serde_json::from_str::<Vec<String>>(&raw) {
            in_use.extend(names);
          }
        }

        let mut template_stmt = conn
          .prepare(
            "SELECT DISTINCT t.required_credentials FROM templates t \
             JOIN tasks k ON k.template_id = t.id",
          )
          .map_err(pa_sqlite::Error::Rusqlite)?;
        let template_rows = template_stmt
          .query_map([], |row| row.get::<_, String>(0))
          .map_err(pa_sqlite::Error::Rusqlite)?
          .collect::<rusqlite::Result<Vec<_>>>()
          .map_err(pa_sqlite::Error::Rusqlite)?;
        for raw in template_rows {
          if let Ok(names) = serde_json::from_str::<Vec<String>>(&raw) {
            in_use.extend(names);
          }
        }

        Ok(in_use)
      })
      .await
      .map_err(StoreError::from)
  }

  pub async fn delete(&self, id: i64) -> Result<()> {
    let affected = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .execute("DELETE FROM credentials WHERE id = ?1", [id])
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

#[cfg(test)]
mod tests {
  use super::*;
  use crate::models::{NewTask, NewTemplate, ParamDef, ParamType, ScheduleType};
  use crate::store::Store;

  fn new_credential(name: &str, value: Option<&str>) -> NewCredential {
    NewCredential {
      name: name.to_string(),
      credential_type: CredentialType::ApiKey,
      description: None,
      encrypted_value: value.map(|v| v.to_string()),
    }
  }

  #[tokio::test]
  async fn create_get_and_list_round_trip_without_leaking_ciphertext() {
    let store = Store::open_in_memory().await.unwrap();
    let created = store
      .credentials()
      .create(new_credential("API_TOKEN", Some("ciphertext")))
      .await
      .unwrap();
    assert!(created.has_value);

    let fetched = store.credentials().get(created.id).await.unwrap().unwrap();
    assert_eq!(fetched.name, "API_TOKEN");
    assert!(fetched.has_value);

    let by_name = store.credentials().get_by_name("API_TOKEN").await.unwrap().unwrap();
    assert_eq!(by_name.id, created.id);
    assert!(store.credentials().exists("API_TOKEN").await.unwrap());
    assert!(store.credentials().has_value("API_TOKEN").await.unwrap());

    let listed = store.credentials().list().await.unwrap();
    assert_eq!(listed.len(), 1);

    let values = store
      .credentials()
      .get_encrypted_values(vec!["API_TOKEN".to_string()])
      .await
      .unwrap();
    assert_eq!(values.get("API_TOKEN"), Some(&"ciphertext".to_string()));
  }

  #[tokio::test]
  async fn unset_credential_reports_no_value_and_is_excluded_from_encrypted_values() {
    let store = Store::open_in_memory().await.unwrap();
    store.credentials().create(new_credential("EMPTY_SECRET", None)).await.unwrap();

    assert!(!store.credentials().has_value("EMPTY_SECRET").await.unwrap());
    assert!(store.credentials().exists("EMPTY_SECRET").await.unwrap());

    let values = store
      .credentials()
      .get_encrypted_values(vec!["EMPTY_SECRET".to_string(), "MISSING".to_string()])
      .await
      .unwrap();
    assert!(values.is_empty());
  }

  #[tokio::test]
  async fn update_value_then_clear_value_round_trip() {
    let store = Store::open_in_memory().await.unwrap();
    let created = store.credentials().create(new_credential("TOKEN", None)).await.unwrap();
    assert!(!created.has_value);

    store.credentials().update_value(created.id, "secret".to_string()).await.unwrap();
    let updated = store.credentials().get(created.id).await.unwrap().unwrap();
    assert!(updated.has_value);

    store.credentials().clear_value(created.id).await.unwrap();
    let cleared = store.credentials().get(created.id).await.unwrap().unwrap();
    assert!(!cleared.has_value);
  }

  #[tokio::test]
  async fn update_metadata_is_a_noop_when_description_is_none() {
    let store = Store::open_in_memory().await.unwrap();
    let created = store.credentials().create(new_credential("TOKEN", None)).await.unwrap();

    let untouched = store.credentials().update_metadata(created.id, None).await.unwrap();
    assert_eq!(untouched.description, None);

    let updated = store
      .credentials()
      .update_metadata(created.id, Some(Some("a token".to_string())))
      .await
      .unwrap();
    assert_eq!(updated.description.as_deref(), Some("a token"));

    let cleared = store.credentials().update_metadata(created.id, Some(None)).await.unwrap();
    assert_eq!(cleared.description, None);
  }

  #[tokio::test]
  async fn touch_last_used_stamps_only_requested_names() {
    let store = Store::open_in_memory().await.unwrap();
    let touched = store.credentials().create(new_credential("TOUCHED", Some("v"))).await.unwrap();
    let untouched = store.credentials().create(new_credential("UNTOUCHED", Some("v"))).await.unwrap();
    assert!(touched.last_used_at.is_none());

    store.credentials().touch_last_used(vec!["TOUCHED".to_string()]).await.unwrap();

    let touched = store.credentials().get(touched.id).await.unwrap().unwrap();
    let untouched = store.credentials().get(untouched.id).await.unwrap().unwrap();
    assert!(touched.last_used_at.is_some());
    assert!(untouched.last_used_at.is_none());
  }

  #[tokio::test]
  async fn get_in_use_unions_task_credentials_and_template_required_credentials() {
    let store = Store::open_in_memory().await.unwrap();
    let template = store
      .templates()
      .create(NewTemplate {
        name: "greet".into(),
        description: None,
        category: None,
        code: "return 1;".into(),
        params_schema: vec![ParamDef {
          name: "n".into(),
          param_type: ParamType::Number,
          required: true,
          default: None,
          description: None,
        }],
        required_credentials: vec!["TEMPLATE_CRED".to_string()],
        suggested_schedule: None,
        is_builtin: false,
      })
      .await
      .unwrap();

    store
      .tasks()
      .create(NewTask {
        template_id: template.id,
        name: "job".into(),
        description: None,
        params: serde_json::json!({"n": 1}).as_object().unwrap().clone(),
        schedule_type: ScheduleType::Cron,
        schedule_value: "* * * * *".into(),
        credentials: vec!["TASK_CRED".to_string()],
        enabled: true,
      })
      .await
      .unwrap();

    let in_use = store.credentials().get_in_use().await.unwrap();
    assert!(in_use.contains("TASK_CRED"));
    assert!(in_use.contains("TEMPLATE_CRED"));
    assert!(!in_use.contains("UNUSED"));
  }

  #[tokio::test]
  async fn delete_removes_row_and_rejects_unknown_id() {
    let store = Store::open_in_memory().await.unwrap();
    let created = store.credentials().create(new_credential("TOKEN", None)).await.unwrap();

    store.credentials().delete(created.id).await.unwrap();
    assert!(!store.credentials().exists("TOKEN").await.unwrap());

    let err = store.credentials().delete(created.id).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound));
  }
}
