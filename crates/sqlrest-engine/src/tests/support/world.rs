//! BDD test world: an engine wired to fake sessions, a temporary SQL
//! repository and the responses of every request sent so far.

use std::cell::RefCell;
use std::fs;
use std::sync::Arc;

use camino::Utf8PathBuf;
use rstest::fixture;
use serde_json::{Value as Json, json};
use sqlrest_config::{Config, PoolSettings};
use tempfile::TempDir;

use super::database::FakeDatabase;
use super::files::CountingFileSystem;
use super::parser::ColonParser;
use super::session::{FakeSession, FakeSessionFactory};
use crate::dispatch::Engine;
use crate::plugins::Collaborators;
use crate::value::Value;

/// Query returning the seeded `people` table.
pub const PEOPLE_SQL: &str = "select id, name from people";

/// Scenario world shared across BDD steps.
pub struct TestWorld {
    pub database: FakeDatabase,
    pub factory: FakeSessionFactory,
    pub files: Arc<CountingFileSystem>,
    directory: TempDir,
    config: Config,
    collaborators: Collaborators,
    engine: Engine,
    token: Option<String>,
    responses: Vec<Json>,
}

impl TestWorld {
    /// Builds a world with both pools configured and an empty repository.
    #[must_use]
    pub fn new() -> Self {
        let directory = TempDir::new().expect("temporary directory");
        let repository =
            Utf8PathBuf::from_path_buf(directory.path().join("repo")).expect("utf-8 path");
        fs::create_dir_all(&repository).expect("create repository");

        let config = Config {
            host: "db.example".to_owned(),
            repository,
            proxy_pool: Some(PoolSettings::new("proxy", "app_proxy")),
            anonymous_pool: Some(PoolSettings::new("anonymous", "app_public")),
            ..Config::default()
        };

        let database = FakeDatabase::default();
        let factory = FakeSessionFactory::new(database.clone());
        let files = Arc::new(CountingFileSystem::default());
        let collaborators = Collaborators::new(Arc::new(factory.clone()), Arc::new(ColonParser))
            .with_files(files.clone());
        let engine = Engine::new(config.clone(), collaborators.clone());

        Self {
            database,
            factory,
            files,
            directory,
            config,
            collaborators,
            engine,
            token: None,
            responses: Vec::new(),
        }
    }

    /// Rebuilds the engine after adjusting its configuration.
    pub fn configure(&mut self, adjust: impl FnOnce(&mut Config)) {
        adjust(&mut self.config);
        self.rebuild();
    }

    /// Rebuilds the engine after replacing collaborators.
    pub fn plug(&mut self, adjust: impl FnOnce(Collaborators) -> Collaborators) {
        self.collaborators = adjust(self.collaborators.clone());
        self.rebuild();
    }

    fn rebuild(&mut self) {
        self.engine = Engine::new(self.config.clone(), self.collaborators.clone());
        self.token = None;
    }

    pub const fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Seeds the `people` table with three rows.
    pub fn seed_people(&self) {
        self.database.with_query(
            PEOPLE_SQL,
            &["ID", "NAME"],
            vec![
                vec![Value::Int(1), Value::from("a")],
                vec![Value::Int(2), Value::from("b")],
                vec![Value::Int(3), Value::from("c")],
            ],
        );
    }

    /// Writes a file relative to the repository root.
    pub fn write_sql(&self, relative: &str, sql: &str) {
        let path = self.config.repository.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create sql directory");
        }
        fs::write(path, sql).expect("write sql file");
    }

    /// Writes a file next to, not inside, the repository.
    pub fn write_outside(&self, name: &str, sql: &str) {
        fs::write(self.directory.path().join(name), sql).expect("write outside file");
    }

    /// Connects with database credentials and keeps the issued token.
    pub fn connect(&mut self) {
        self.send(
            "connect",
            json!({"username": "scott", "auth": {"method": "database", "secret": "tiger"}}),
        );
        self.token = self
            .response()
            .get("session")
            .and_then(Json::as_str)
            .map(str::to_owned);
    }

    /// Sends a request, prefixing the current token when connected.
    pub fn send(&mut self, path: &str, payload: Json) {
        self.send_text(path, &payload.to_string());
    }

    /// Sends a request with a raw body.
    pub fn send_text(&mut self, path: &str, body: &str) {
        let path = match &self.token {
            Some(token) => format!("{token}/{path}"),
            None => path.to_owned(),
        };
        let rendered = self.engine.post(&path, body);
        let response = serde_json::from_str(&rendered)
            .unwrap_or_else(|error| panic!("response is not JSON ({error}): {rendered}"));
        self.responses.push(response);
    }

    /// Sends a request without the current token.
    pub fn send_anonymously(&mut self, path: &str, payload: Json) {
        let token = self.token.take();
        self.send(path, payload);
        self.token = token;
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Last response received.
    pub fn response(&self) -> &Json {
        self.responses.last().expect("a request was sent")
    }

    pub fn responses(&self) -> &[Json] {
        &self.responses
    }

    /// Session opened by the last successful connect.
    pub fn session(&self) -> Arc<FakeSession> {
        self.factory.last_session().expect("a session was opened")
    }

    /// Whether the last response reports success.
    pub fn succeeded(&self) -> bool {
        self.response().get("success") == Some(&Json::Bool(true))
    }

    /// Message of the last response, or an empty string.
    pub fn message(&self) -> &str {
        self.response()
            .get("message")
            .and_then(Json::as_str)
            .unwrap_or_default()
    }
}

impl Default for TestWorld {
    fn default() -> Self {
        Self::new()
    }
}

/// Provides a fresh world for each scenario.
#[fixture]
pub fn world() -> RefCell<TestWorld> {
    RefCell::new(TestWorld::new())
}
