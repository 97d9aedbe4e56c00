use chrono::{DateTime, Utc};
use cron::Schedule;
use futures_util::future::BoxFuture;
use log::*;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

type CallbackError = Box<dyn std::error::Error + Sync + Send>;
type CallbackFunction = dyn Fn() -> BoxFuture<'static, Result<(), CallbackError>> + Sync + Send;
type LatestCallbackExecution = Option<(DateTime<Utc>, Option<CallbackError>)>;

static TASK_COUNTER: AtomicI64 = AtomicI64::new(1);

pub trait CallbackResultTrait {
  fn into_result(self) -> Result<(), CallbackError>;
}

impl CallbackResultTrait for () {
  fn into_result(self) -> Result<(), CallbackError> {
    return Ok(());
  }
}

impl<T: Into<CallbackError>> CallbackResultTrait for Result<(), T> {
  fn into_result(self) -> Result<(), CallbackError> {
    return self.map_err(|e| e.into());
  }
}

/// One scheduled cron job. Named `Task` after the teacher's system-job scheduler;
/// here every task is owned by exactly one lambda function instead of the process.
#[allow(unused)]
pub struct Task {
  pub id: i64,
  pub name: String,
  pub schedule: Schedule,
  pub(crate) callback: Arc<CallbackFunction>,

  handle: Option<tokio::task::AbortHandle>,
  latest: Arc<Mutex<LatestCallbackExecution>>,
}

impl Task {
  fn new(id: i64, name: String, schedule: Schedule, callback: Arc<CallbackFunction>) -> Self {
    return Task {
      id,
      name,
      schedule,
      callback,
      handle: None,
      latest: Arc::new(Mutex::new(None)),
    };
  }

  pub fn start(&mut self) {
    let name = self.name.clone();
    let callback = self.callback.clone();
    let schedule = self.schedule.clone();
    let latest = self.latest.clone();

    let handle = tokio::spawn(async move {
      loop {
        let now = Utc::now();
        let Some(next) = schedule.upcoming(Utc).next() else {
          break;
        };
        let Ok(duration) = (next - now).to_std() else {
          warn!("Invalid duration for '{name}': {next:?}");
          continue;
        };

        tokio::time::sleep(duration).await;

        let result = (*callback)().await;
        if let Err(ref err) = result {
          warn!("Cron job '{name}' failed: {err}");
        }
        *latest.lock() = Some((Utc::now(), result.err()));
      }

      debug!("Exited cron task: '{name}'");
    });

    self.handle = Some(handle.abort_handle());
  }

  fn stop(&mut self) {
    if let Some(ref handle) = self.handle {
      handle.abort();
    }
    self.handle = None;
  }
}

/// Registry of running cron tasks, keyed by an opaque job id.
///
/// This mirrors the teacher's system-job `TaskRegistry` but is generic over any named
/// callback rather than the fixed set of built-in maintenance jobs: the Trigger
/// Registry uses it to host one job per `(function_id, cron trigger)`.
pub struct TaskRegistry {
  pub(crate) tasks: Mutex<HashMap<i64, Task>>,
}

impl TaskRegistry {
  pub fn new() -> Self {
    return TaskRegistry {
      tasks: Mutex::new(HashMap::new()),
    };
  }

  /// Registers and starts a new job, returning its id. `id` can be supplied explicitly
  /// (the registry keys cron jobs by `lambda_function_<function_id>`-derived ids) or
  /// left to an internal counter. Re-registering an id that's already running stops the
  /// old task first, so calling this twice for the same function never leaks a loop.
  pub fn add_task(
    &self,
    id: i64,
    name: impl Into<String>,
    schedule: Schedule,
    callback: Box<CallbackFunction>,
  ) {
    let mut task = Task::new(id, name.into(), schedule, callback.into());
    task.start();
    if let Some(mut previous) = self.tasks.lock().insert(id, task) {
      previous.stop();
    }
  }

  /// Stops and removes a job. No-op if the id is unknown.
  pub fn remove_task(&self, id: i64) {
    if let Some(mut task) = self.tasks.lock().remove(&id) {
      task.stop();
    }
  }

  pub fn next_id(&self) -> i64 {
    return TASK_COUNTER.fetch_add(1, Ordering::SeqCst);
  }

  pub fn contains(&self, id: i64) -> bool {
    return self.tasks.lock().contains_key(&id);
  }

  pub fn len(&self) -> usize {
    return self.tasks.lock().len();
  }

  pub fn is_empty(&self) -> bool {
    return self.len() == 0;
  }

  pub fn stop_all(&self) {
    for task in self.tasks.lock().values_mut() {
      task.stop();
    }
  }
}

impl Default for TaskRegistry {
  fn default() -> Self {
    return Self::new();
  }
}

impl Drop for TaskRegistry {
  fn drop(&mut self) {
    self.stop_all();
  }
}

pub fn build_callback<O, F, Fut>(f: F) -> Box<CallbackFunction>
where
  F: 'static + Sync + Send + Fn() -> Fut,
  Fut: Sync + Send + Future<Output = O>,
  O: CallbackResultTrait,
{
  let fun = Arc::new(f);

  return Box::new(move || {
    let fun = fun.clone();

    return Box::pin(async move {
      return fun().await.into_result();
    });
  });
}
