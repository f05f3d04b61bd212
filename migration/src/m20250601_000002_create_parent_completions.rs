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
                    .table(ParentCompletions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ParentCompletions::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ParentCompletions::EntityType).string().not_null())
                    .col(ColumnDef::new(ParentCompletions::EntityId).string().not_null())
                    .col(ColumnDef::new(ParentCompletions::Total).integer().not_null())
                    .col(ColumnDef::new(ParentCompletions::Completed).integer().not_null())
                    .col(ColumnDef::new(ParentCompletions::Failed).integer().not_null())
                    .col(
                        ColumnDef::new(ParentCompletions::Cancelled)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ParentCompletions::FinalizedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uq_parent_completions_entity")
                    .table(ParentCompletions::Table)
                    .col(ParentCompletions::EntityType)
                    .col(ParentCompletions::EntityId)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ParentCompletions::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ParentCompletions {
    Table,
    Id,
    EntityType,
    EntityId,
    Total,
    Completed,
    Failed,
    Cancelled,
    FinalizedAt,
}
