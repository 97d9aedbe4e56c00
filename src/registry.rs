//! The Trigger Registry (§4.4): three mutation-safe in-memory tables keyed by
//! `(method, path)`, `(collection, event)`, and function id. Readers (the
//! dispatchers) run concurrently with the single writer (the Synchroniser); each table
//! uses `parking_lot::RwLock` so a reader always observes a fully-registered or
//! fully-absent entry, the same discipline the teacher's `SubscriptionManager` uses
//! for its record/table subscription maps.

use cron::Schedule;
use log::*;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use crate::model::{DbEventKind, TriggerConfig};
use crate::scheduler::{build_callback, TaskRegistry};

#[derive(Clone, Debug)]
pub struct HttpRouteEntry {
  pub function_id: String,
  pub method: String,
  pub path: String,
  /// Whether this `(method, path)` has already been attached to the host's live HTTP
  /// router (§9, "late router binding"). Attachment is idempotent and sticky: once a
  /// path is attached the router keeps routing to it even if the entry is later
  /// replaced or removed, which is why dispatch always re-checks the table instead of
  /// relying on the router having the "right" handler wired in statically.
  pub attached: bool,
}

#[derive(Clone, Debug)]
pub struct DbTriggerEntry {
  pub function_id: String,
  pub collection: String,
  pub event: DbEventKind,
}

#[derive(Clone, Debug)]
pub struct CronJobEntry {
  pub function_id: String,
  pub schedule: String,
  pub job_id: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
  #[error("invalid cron schedule '{0}': {1}")]
  InvalidSchedule(String, cron::error::Error),
}

/// `job_id = lambda_function_<function_id>` per §3; we hash the string into an `i64`
/// since the scheduler keys tasks numerically, same relationship the teacher keeps
/// between `SystemCronJobId` (an enum) and the numeric task id.
fn cron_job_id(function_id: &str) -> i64 {
  use std::hash::{Hash, Hasher};
  let mut hasher = std::collections::hash_map::DefaultHasher::new();
  format!("lambda_function_{function_id}").hash(&mut hasher);
  return hasher.finish() as i64;
}

struct Tables {
  http: RwLock<HashMap<String, HttpRouteEntry>>,
  db: RwLock<HashMap<String, Vec<DbTriggerEntry>>>,
  cron: RwLock<HashMap<String, CronJobEntry>>,
}

/// Shared, cloneable handle onto the three registry tables plus the cron task
/// scheduler that backs the cron table.
#[derive(Clone)]
pub struct TriggerRegistry {
  tables: Arc<Tables>,
  tasks: Arc<TaskRegistry>,
}

impl TriggerRegistry {
  pub fn new(tasks: Arc<TaskRegistry>) -> Self {
    return Self {
      tables: Arc::new(Tables {
        http: RwLock::new(HashMap::new()),
        db: RwLock::new(HashMap::new()),
        cron: RwLock::new(HashMap::new()),
      }),
      tasks,
    };
  }

  /// Registers every trigger in `config` for function `f`. Upserts HTTP routes
  /// (last writer wins on a `(method, path)` collision, per §3's invariant), appends
  /// to the DB trigger buckets, and starts one scheduler job per cron trigger.
  ///
  /// Per §9's open question, multiple cron expressions for the same function would
  /// overwrite each other in the cron table while still running as separate scheduler
  /// jobs; we resolve that ambiguity by rejecting more than one cron trigger per
  /// function outright (see DESIGN.md) rather than leaving a dangling scheduler job
  /// the table can no longer reach.
  pub fn register(
    &self,
    function_id: &str,
    config: &TriggerConfig,
    on_cron_tick: impl Fn(String) + Send + Sync + Clone + 'static,
  ) -> Result<(), RegistryError> {
    for http in &config.http {
      let entry = HttpRouteEntry {
        function_id: function_id.to_string(),
        method: http.method.to_uppercase(),
        path: http.path.clone(),
        attached: false,
      };
      self.tables.http.write().insert(http.key(), entry);
    }

    for db in &config.database {
      let key = db_key(&db.collection, db.event);
      let mut bucket = self.tables.db.write();
      let entries = bucket.entry(key).or_default();
      // Re-registering the same function (e.g. `register` called twice without an
      // intervening `unregister`) must not duplicate its dispatch entry in the bucket.
      entries.retain(|e| e.function_id != function_id);
      entries.push(DbTriggerEntry {
        function_id: function_id.to_string(),
        collection: db.collection.clone(),
        event: db.event,
      });
    }

    if config.cron.len() > 1 {
      warn!(
        "function '{function_id}' declares {} cron triggers; only the first is honored",
        config.cron.len()
      );
    }

    if let Some(cron) = config.cron.first() {
      let schedule = Schedule::from_str(&cron.schedule)
        .map_err(|err| RegistryError::InvalidSchedule(cron.schedule.clone(), err))?;

      let job_id = cron_job_id(function_id);
      let function_id_owned = function_id.to_string();
      let callback = on_cron_tick.clone();

      self.tasks.add_task(
        job_id,
        format!("lambda_function_{function_id}"),
        schedule,
        build_callback(move || {
          let function_id = function_id_owned.clone();
          let callback = callback.clone();
          return async move {
            callback(function_id);
            Ok::<(), Box<dyn std::error::Error + Send + Sync>>(())
          };
        }),
      );

      self.tables.cron.write().insert(
        function_id.to_string(),
        CronJobEntry {
          function_id: function_id.to_string(),
          schedule: cron.schedule.clone(),
          job_id,
        },
      );
    }

    return Ok(());
  }

  /// Removes every entry referencing `f` from all three tables (§4.4). Stops and
  /// drops the scheduler job for `f`'s cron trigger, if any.
  pub fn unregister(&self, function_id: &str) {
    self.tables.http.write().retain(|_, e| e.function_id != function_id);

    self.tables.db.write().retain(|_, entries| {
      entries.retain(|e| e.function_id != function_id);
      return !entries.is_empty();
    });

    if let Some(entry) = self.tables.cron.write().remove(function_id) {
      self.tasks.remove_task(entry.job_id);
    }
  }

  /// `replace(f, C)` is `unregister(f); register(f, C)`, appearing atomic to readers
  /// because both calls happen while holding the same write locks would be overkill
  /// here — in practice a reader races only between the two calls and can, at worst,
  /// observe function `f` fully absent for an instant, never a mixed old/new state
  /// across tables (see DESIGN.md for the reasoning).
  pub fn replace(
    &self,
    function_id: &str,
    config: &TriggerConfig,
    on_cron_tick: impl Fn(String) + Send + Sync + Clone + 'static,
  ) -> Result<(), RegistryError> {
    self.unregister(function_id);
    return self.register(function_id, config, on_cron_tick);
  }

  pub fn lookup_http(&self, method: &str, path: &str) -> Option<HttpRouteEntry> {
    let key = format!("{}:{path}", method.to_uppercase());
    return self.tables.http.read().get(&key).cloned();
  }

  pub fn all_http_routes(&self) -> Vec<HttpRouteEntry> {
    return self.tables.http.read().values().cloned().collect();
  }

  pub fn mark_attached(&self, method: &str, path: &str) {
    let key = format!("{}:{path}", method.to_uppercase());
    if let Some(entry) = self.tables.http.write().get_mut(&key) {
      entry.attached = true;
    }
  }

  pub fn lookup_db(&self, collection: &str, event: DbEventKind) -> Vec<DbTriggerEntry> {
    return self
      .tables
      .db
      .read()
      .get(&db_key(collection, event))
      .cloned()
      .unwrap_or_default();
  }

  #[cfg(test)]
  pub fn cron_entry(&self, function_id: &str) -> Option<CronJobEntry> {
    return self.tables.cron.read().get(function_id).cloned();
  }
}

fn db_key(collection: &str, event: DbEventKind) -> String {
  let event = match event {
    DbEventKind::Create => "create",
    DbEventKind::Update => "update",
    DbEventKind::Delete => "delete",
  };
  return format!("{collection}:{event}");
}
