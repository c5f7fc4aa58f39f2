//! Data handed to injected processes.

use serde::{Deserialize, Serialize};
use std::ops::Index;

/// Operating system process identifier.
pub type ProcessId = u32;

/// How a modification combines with the variable's current value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvMod {
    Set,
    Append,
    Prepend,
}

/// Separator placed between the old and new value by `Append`/`Prepend`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvSep {
    /// `:` on Unix, `;` on Windows.
    Platform,
    SemiColon,
    Colon,
    None,
}

impl EnvSep {
    pub fn as_str(self) -> &'static str {
        match self {
            EnvSep::Platform => {
                if cfg!(windows) {
                    ";"
                } else {
                    ":"
                }
            }
            EnvSep::SemiColon => ";",
            EnvSep::Colon => ":",
            EnvSep::None => "",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentModification {
    pub name: String,
    pub value: String,
    pub mode: EnvMod,
    pub separator: EnvSep,
}

impl EnvironmentModification {
    pub fn new(mode: EnvMod, separator: EnvSep, name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            mode,
            separator,
        }
    }

    pub fn set(name: &str, value: &str) -> Self {
        Self::new(EnvMod::Set, EnvSep::None, name, value)
    }

    pub fn append(name: &str, value: &str, separator: EnvSep) -> Self {
        Self::new(EnvMod::Append, separator, name, value)
    }

    pub fn prepend(name: &str, value: &str, separator: EnvSep) -> Self {
        Self::new(EnvMod::Prepend, separator, name, value)
    }
}

/// Ordered modification list. Its length and content are fixed once built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvironmentModifications {
    entries: Box<[EnvironmentModification]>,
}

impl EnvironmentModifications {
    pub fn new(entries: Vec<EnvironmentModification>) -> Self {
        Self {
            entries: entries.into_boxed_slice(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, EnvironmentModification> {
        self.entries.iter()
    }
}

impl FromIterator<EnvironmentModification> for EnvironmentModifications {
    fn from_iter<I: IntoIterator<Item = EnvironmentModification>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl Index<usize> for EnvironmentModifications {
    type Output = EnvironmentModification;

    fn index(&self, index: usize) -> &Self::Output {
        &self.entries[index]
    }
}

impl<'a> IntoIterator for &'a EnvironmentModifications {
    type Item = &'a EnvironmentModification;
    type IntoIter = std::slice::Iter<'a, EnvironmentModification>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Capture behaviour requested from the injected component.
///
/// The crate only passes these through; the component interprets them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureOptions {
    pub allow_vsync: bool,
    pub allow_fullscreen: bool,
    pub api_validation: bool,
    pub capture_callstacks: bool,
    pub capture_callstacks_only_draws: bool,
    pub delay_for_debugger: u32,
    pub verify_buffer_access: bool,
    pub hook_into_children: bool,
    pub ref_all_resources: bool,
    pub save_all_initials: bool,
    pub capture_all_cmd_lists: bool,
    pub debug_output_mute: bool,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            allow_vsync: true,
            allow_fullscreen: true,
            api_validation: false,
            capture_callstacks: false,
            capture_callstacks_only_draws: false,
            delay_for_debugger: 0,
            verify_buffer_access: false,
            hook_into_children: false,
            ref_all_resources: false,
            save_all_initials: false,
            capture_all_cmd_lists: false,
            debug_output_mute: true,
        }
    }
}
