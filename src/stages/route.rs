use std::fmt;

/// Screens of the generation flow, each independently enterable
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Route {
    Dashboard,
    Upload,
    Fill { template_id: String },
    Export { template_id: String },
    LiveFormat {
        session_id: String,
        /// Carried along so "start over" can return to the right Fill screen
        template_id: Option<String>,
    },
}

impl Route {
    pub fn path(&self) -> String {
        match self {
            Route::Dashboard => "/dashboard".to_string(),
            Route::Upload => "/generate/upload".to_string(),
            Route::Fill { template_id } => {
                format!("/generate/fill?template={}", urlencoding::encode(template_id))
            }
            Route::Export { template_id } => {
                format!("/generate/export?template={}", urlencoding::encode(template_id))
            }
            Route::LiveFormat {
                session_id,
                template_id,
            } => {
                let mut path = format!("/generate/format?session={}", urlencoding::encode(session_id));
                if let Some(template_id) = template_id {
                    path.push_str("&template=");
                    path.push_str(&urlencoding::encode(template_id));
                }
                path
            }
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// Outcome of entering a stage.
///
/// A missing prerequisite is not an error: the stage names the earlier
/// screen that produces it and the caller navigates there instead.
#[derive(Debug)]
pub enum StageEntry<T> {
    Ready(T),
    Redirect(Route),
}

impl<T> StageEntry<T> {
    pub fn ready(self) -> Option<T> {
        match self {
            StageEntry::Ready(stage) => Some(stage),
            StageEntry::Redirect(_) => None,
        }
    }

    pub fn redirect_target(&self) -> Option<&Route> {
        match self {
            StageEntry::Ready(_) => None,
            StageEntry::Redirect(route) => Some(route),
        }
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self, StageEntry::Redirect(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_encode_ids() {
        assert_eq!(
            Route::Fill {
                template_id: "a b".to_string()
            }
            .path(),
            "/generate/fill?template=a%20b"
        );
        assert_eq!(
            Route::LiveFormat {
                session_id: "s1".to_string(),
                template_id: Some("t1".to_string())
            }
            .to_string(),
            "/generate/format?session=s1&template=t1"
        );
    }

    #[test]
    fn test_entry_helpers() {
        let entry: StageEntry<()> = StageEntry::Redirect(Route::Upload);
        assert!(entry.is_redirect());
        assert_eq!(entry.redirect_target(), Some(&Route::Upload));
        assert!(entry.ready().is_none());
    }
}
