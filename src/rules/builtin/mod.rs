//! Built-in rule catalogue.
//!
//! Each submodule contributes the records for one concern through a
//! `create_rules()` function. Records are declarative; compilation happens in
//! the [`PatternStore`](crate::rules::PatternStore) so a broken record is
//! reported like any other load error.

pub mod container;
pub mod critical;
pub mod filesystem;
pub mod network;
pub mod package;
pub mod permissions;
pub mod process;
pub mod structural;
pub mod system;
pub mod windows;

#[cfg(test)]
pub(crate) mod test_helpers;

use crate::rules::RuleDefinition;

/// Every built-in record, global-critical first.
#[must_use]
pub fn builtin_definitions() -> Vec<RuleDefinition> {
    let mut rules = critical::create_rules();
    rules.extend(filesystem::create_rules());
    rules.extend(permissions::create_rules());
    rules.extend(network::create_rules());
    rules.extend(process::create_rules());
    rules.extend(system::create_rules());
    rules.extend(container::create_rules());
    rules.extend(package::create_rules());
    rules.extend(windows::create_rules());
    rules.extend(structural::create_rules());
    rules
}
