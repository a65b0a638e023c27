use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Append-only audit trail for notification deliveries.
        // Rows are updated in place as a job's status changes, never deleted.
        manager
            .create_table(
                Table::create()
                    .table(EmailSendHistory::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(EmailSendHistory::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(EmailSendHistory::JobId)
                            .uuid()
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(EmailSendHistory::EmailType)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(EmailSendHistory::RecipientEmail)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(
                        timestamp_with_time_zone(EmailSendHistory::QueuedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(EmailSendHistory::Status)
                            .string_len(32)
                            .not_null()
                            .default("queued"),
                    )
                    .col(
                        ColumnDef::new(EmailSendHistory::FailureReason)
                            .string_len(500)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(EmailSendHistory::RetryCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(EmailSendHistory::TargetUserId)
                            .big_integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(EmailSendHistory::TemplateSignature)
                            .string_len(128)
                            .null(),
                    )
                    .col(timestamp_with_time_zone_null(EmailSendHistory::SentAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_email_send_history_target_user")
                            .from(EmailSendHistory::Table, EmailSendHistory::TargetUserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        // Indexes for the dedup lookup and for admin listings
        manager
            .create_index(
                Index::create()
                    .name("idx_email_send_history_recipient_type")
                    .table(EmailSendHistory::Table)
                    .col(EmailSendHistory::RecipientEmail)
                    .col(EmailSendHistory::EmailType)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_email_send_history_queued_at")
                    .table(EmailSendHistory::Table)
                    .col(EmailSendHistory::QueuedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_email_send_history_target_user_id")
                    .table(EmailSendHistory::Table)
                    .col(EmailSendHistory::TargetUserId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(EmailSendHistory::Table).to_owned())
            .await?;

        Ok(())
    }
}

/// Reference to users table for foreign keys.
#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum EmailSendHistory {
    Table,
    Id,
    JobId,
    EmailType,
    RecipientEmail,
    QueuedAt,
    Status,
    FailureReason,
    RetryCount,
    TargetUserId,
    TemplateSignature,
    SentAt,
}
