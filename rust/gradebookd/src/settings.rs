use serde::Serialize;

pub const ENV_LOG: &str = "GRADEBOOKD_LOG";
pub const ENV_SCHOOL_NAME: &str = "GRADEBOOKD_SCHOOL_NAME";
pub const ENV_ACADEMIC_YEAR: &str = "GRADEBOOKD_ACADEMIC_YEAR";

/// Bulletin header settings. Seeded from the environment, adjustable through `setup.update`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub school_name: Option<String>,
    pub academic_year: Option<String>,
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            school_name: non_empty(std::env::var(ENV_SCHOOL_NAME).ok()),
            academic_year: non_empty(std::env::var(ENV_ACADEMIC_YEAR).ok()),
        }
    }

    /// Applies a `setup.update` patch. Absent keys are left alone, `null` or blank clears.
    pub fn apply_patch(&mut self, patch: &serde_json::Value) -> Result<(), String> {
        let Some(obj) = patch.as_object() else {
            return Err("params must be an object".to_string());
        };
        for (key, slot) in [
            ("schoolName", &mut self.school_name),
            ("academicYear", &mut self.academic_year),
        ] {
            match obj.get(key) {
                None => {}
                Some(v) if v.is_null() => *slot = None,
                Some(v) => {
                    let Some(s) = v.as_str() else {
                        return Err(format!("{} must be string or null", key));
                    };
                    *slot = non_empty(Some(s.to_string()));
                }
            }
        }
        Ok(())
    }
}
