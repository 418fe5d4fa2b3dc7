//! Executes parsed migration statements through the services.

use crate::error::Result;
use crate::schema::ItemData;
use crate::service::{DictDataService, DictService};

use super::statement::{AlterAction, Statement};

/// Applies statements of one script.
pub(crate) struct Interpreter<'a> {
    dicts: &'a DictService,
    data: &'a DictDataService,
    script: &'a str,
}

impl<'a> Interpreter<'a> {
    pub(crate) fn new(dicts: &'a DictService, data: &'a DictDataService, script: &'a str) -> Self {
        Self {
            dicts,
            data,
            script,
        }
    }

    pub(crate) fn execute(&self, statement: Statement) -> Result<()> {
        match statement {
            Statement::CreateDict(dict) => {
                self.dicts.create(dict)?;
            }
            Statement::AlterDict { dict_id, action } => match action {
                AlterAction::AddField(field) => {
                    self.dicts.add_field(&dict_id, field)?;
                }
                AlterAction::DropField(field_id) => {
                    self.dicts.remove_field(&dict_id, &field_id)?;
                }
                AlterAction::RenameField { from, to } => {
                    self.dicts.rename_field(&dict_id, &from, &to)?;
                }
            },
            Statement::DropDict(dict_id) => self.dicts.delete(&dict_id)?,
            Statement::CreateEnum { dict_id, dict_enum } => {
                self.dicts.create_enum(&dict_id, dict_enum)?;
            }
            Statement::DropEnum { dict_id, enum_id } => {
                self.dicts.delete_enum(&dict_id, &enum_id)?;
            }
            Statement::CreateIndex { dict_id, index } => {
                self.dicts.create_index(&dict_id, index)?;
            }
            Statement::DropIndex { dict_id, index_id } => {
                self.dicts.delete_index(&dict_id, &index_id)?;
            }
            Statement::CreateConstraint {
                dict_id,
                constraint,
            } => {
                self.dicts.create_constraint(&dict_id, constraint)?;
            }
            Statement::DropConstraint {
                dict_id,
                constraint_id,
            } => {
                self.dicts.delete_constraint(&dict_id, &constraint_id)?;
            }
            Statement::Insert {
                dict_id,
                columns,
                rows,
            } => {
                let items: Vec<ItemData> = rows
                    .iter()
                    .map(|row| {
                        columns
                            .iter()
                            .cloned()
                            .zip(row.iter().map(|c| c.to_value()))
                            .collect()
                    })
                    .collect();
                let created = self.data.create_many(&dict_id, items)?;
                tracing::debug!(
                    "{}: inserted {} items into '{}'",
                    self.script,
                    created.len(),
                    dict_id
                );
            }
            Statement::Update {
                dict_id,
                assignments,
                filter,
            } => {
                let patch: ItemData = assignments
                    .into_iter()
                    .map(|(field, constant)| (field, constant.to_value()))
                    .collect();
                let updated = self.data.update_by_filter(&dict_id, &filter, &patch)?;
                tracing::debug!("{}: updated {} items in '{}'", self.script, updated, dict_id);
            }
            Statement::Delete { dict_id, filter } => {
                let reason = format!("migration {}", self.script);
                let deleted = self
                    .data
                    .delete_by_filter(&dict_id, &filter, true, Some(&reason))?;
                tracing::debug!("{}: deleted {} items in '{}'", self.script, deleted, dict_id);
            }
        }
        Ok(())
    }
}
