// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Jobs::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Jobs::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Jobs::Lane).string().not_null())
                    .col(ColumnDef::new(Jobs::Kind).string().not_null())
                    .col(ColumnDef::new(Jobs::ParentType).string())
                    .col(ColumnDef::new(Jobs::ParentId).string())
                    .col(ColumnDef::new(Jobs::DedupKey).string())
                    .col(ColumnDef::new(Jobs::ActiveDedupKey).string())
                    .col(ColumnDef::new(Jobs::Payload).binary().not_null())
                    .col(ColumnDef::new(Jobs::Priority).integer().not_null().default(0))
                    .col(ColumnDef::new(Jobs::Status).string().not_null())
                    .col(ColumnDef::new(Jobs::Attempts).integer().not_null().default(0))
                    .col(ColumnDef::new(Jobs::MaxAttempts).integer().not_null().default(3))
                    .col(
                        ColumnDef::new(Jobs::ScheduledAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Jobs::LastError).text())
                    .col(ColumnDef::new(Jobs::LeaseOwner).uuid())
                    .col(ColumnDef::new(Jobs::LeaseExpiresAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(Jobs::CompletedAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(Jobs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Jobs::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Claim query: status = pending AND scheduled_at <= now
        manager
            .create_index(
                Index::create()
                    .name("idx_jobs_status_scheduled_at")
                    .table(Jobs::Table)
                    .col(Jobs::Status)
                    .col(Jobs::ScheduledAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_jobs_kind_status_priority")
                    .table(Jobs::Table)
                    .col(Jobs::Kind)
                    .col(Jobs::Status)
                    .col(Jobs::Priority)
                    .col(Jobs::ScheduledAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_jobs_parent")
                    .table(Jobs::Table)
                    .col(Jobs::ParentType)
                    .col(Jobs::ParentId)
                    .to_owned(),
            )
            .await?;

        // NULL for terminal jobs, so only live jobs collide
        manager
            .create_index(
                Index::create()
                    .name("uq_jobs_active_dedup_key")
                    .table(Jobs::Table)
                    .col(Jobs::ActiveDedupKey)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_jobs_lane_completed_at")
                    .table(Jobs::Table)
                    .col(Jobs::Lane)
                    .col(Jobs::CompletedAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Jobs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Jobs {
    Table,
    Id,
    Lane,
    Kind,
    ParentType,
    ParentId,
    DedupKey,
    ActiveDedupKey,
    Payload,
    Priority,
    Status,
    Attempts,
    MaxAttempts,
    ScheduledAt,
    LastError,
    LeaseOwner,
    LeaseExpiresAt,
    CompletedAt,
    CreatedAt,
    UpdatedAt,
}
