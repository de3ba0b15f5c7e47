use super::runner::Migration;

const WEBFARM_SQL: &str = include_str!("../../migrations/0001_webfarm.sql");

/// Migrations that create the web farm tables, in order.
pub fn builtin_migrations() -> Vec<Migration> {
    vec![Migration::new("0001_webfarm", WEBFARM_SQL)]
}
