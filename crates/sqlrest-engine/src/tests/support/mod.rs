//! Test doubles and the scenario world shared by the engine's suites.

mod database;
mod files;
mod parser;
mod session;
#[path = "world.rs"]
mod scenario_world;

pub use database::{FakeDatabase, Gate};
pub use files::CountingFileSystem;
pub use parser::ColonParser;
pub use session::{FakeSession, FakeSessionFactory};
pub use scenario_world::{PEOPLE_SQL, TestWorld, world};
