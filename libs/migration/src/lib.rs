pub use sea_orm_migration::prelude::*;

mod m20250612_000000_create_email_send_history;
mod m20250612_000001_add_email_preferences_to_users;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250612_000000_create_email_send_history::Migration),
            Box::new(m20250612_000001_add_email_preferences_to_users::Migration),
        ]
    }
}
