use super::types::{EnvMod, EnvironmentModification, EnvironmentModifications};
use std::collections::BTreeMap;

/// Environment as a name to value map.
pub type Environment = BTreeMap<String, String>;

/// The current process environment. Variables that are not valid UTF-8 are skipped.
pub fn inherited_environment() -> Environment {
    std::env::vars_os()
        .filter_map(|(name, value)| Some((name.into_string().ok()?, value.into_string().ok()?)))
        .collect()
}

/// Applies `mods` to `env` in list order, so later entries see the result of earlier ones.
pub fn apply_modifications(env: &mut Environment, mods: &EnvironmentModifications) {
    for modification in mods {
        apply_modification(env, modification);
    }
}

/// Applies one modification. Append and prepend on an unset or empty variable behave like
/// set; entries with an empty name are ignored.
pub fn apply_modification(env: &mut Environment, modification: &EnvironmentModification) {
    if modification.name.is_empty() {
        return;
    }

    let sep = modification.separator.as_str();
    let updated = match (modification.mode, env.get(&modification.name)) {
        (EnvMod::Set, _) => modification.value.clone(),
        (EnvMod::Append, Some(current)) if !current.is_empty() => {
            format!("{}{}{}", current, sep, modification.value)
        }
        (EnvMod::Prepend, Some(current)) if !current.is_empty() => {
            format!("{}{}{}", modification.value, sep, current)
        }
        _ => modification.value.clone(),
    };
    env.insert(modification.name.clone(), updated);
}
