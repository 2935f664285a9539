//! Device-side collaborators and launch dispatch.
//!
//! The host app implements these traits; the core only calls them.

pub mod command;

use crate::error::ToolDispatchError;
use async_trait::async_trait;

pub use command::{extract_launch_target, extract_search_query, parse_commands, strip_commands, ToolCommand};

/// An installed application as the host enumerates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledApp {
    pub label: String,
    pub package: String,
}

impl InstalledApp {
    pub fn new(label: impl Into<String>, package: impl Into<String>) -> Self {
        Self { label: label.into(), package: package.into() }
    }
}

pub trait AppRegistry: Send + Sync {
    fn installed_apps(&self) -> Vec<InstalledApp>;
    /// Launch by package identifier. Returns false if the host refused.
    fn launch(&self, package: &str) -> bool;
}

/// Returns a short formatted block of top results, or an error string.
#[async_trait]
pub trait WebSearchProvider: Send + Sync {
    async fn search(&self, query: &str) -> Result<String, String>;
}

/// Returns the readable text of a page. Markup handling is the host's job.
#[async_trait]
pub trait WebFetcher: Send + Sync {
    async fn fetch_text(&self, url: &str) -> Result<String, String>;
}

/// Supplies already-flattened on-screen text.
pub trait ScreenContextProvider: Send + Sync {
    fn screen_text(&self) -> Option<String>;
}

/// Resolve a spoken app name against installed labels.
///
/// An exact case-insensitive match wins. Otherwise a label containing the
/// target (or contained in it) matches, and the longest such label is taken;
/// on equal length the first enumerated app wins.
pub fn resolve_app<'a>(
    target: &str,
    apps: &'a [InstalledApp],
) -> Result<&'a InstalledApp, ToolDispatchError> {
    let wanted = target.trim().to_lowercase();
    if wanted.is_empty() {
        return Err(ToolDispatchError::AppNotFound(target.to_string()));
    }

    if let Some(app) = apps.iter().find(|a| a.label.to_lowercase() == wanted) {
        return Ok(app);
    }

    let mut best: Option<(&InstalledApp, usize)> = None;
    for app in apps {
        let label = app.label.to_lowercase();
        if label.is_empty() || !(label.contains(&wanted) || wanted.contains(&label)) {
            continue;
        }
        let len = label.chars().count();
        if best.map_or(true, |(_, best_len)| len > best_len) {
            best = Some((app, len));
        }
    }

    best.map(|(app, _)| app)
        .ok_or_else(|| ToolDispatchError::AppNotFound(target.to_string()))
}

fn try_launch(target: &str, registry: &dyn AppRegistry) -> Result<InstalledApp, ToolDispatchError> {
    let apps = registry.installed_apps();
    let app = resolve_app(target, &apps)?.clone();
    if !registry.launch(&app.package) {
        return Err(ToolDispatchError::LaunchRefused(app.package));
    }
    Ok(app)
}

/// Launch the app named by `target`. Failure is reported as `false`.
pub fn dispatch_launch(target: &str, registry: &dyn AppRegistry) -> bool {
    match try_launch(target, registry) {
        Ok(app) => {
            log::info!("[TOOLS] Launched {} ({})", app.label, app.package);
            true
        }
        Err(e) => {
            log::warn!("[TOOLS] {}", e);
            false
        }
    }
}

/// Dispatch the first LAUNCH command in `text`, if any.
///
/// Returns the target that was attempted and whether it launched.
pub fn handle_launch(text: &str, registry: &dyn AppRegistry) -> Option<(String, bool)> {
    let target = extract_launch_target(text)?;
    let launched = dispatch_launch(&target, registry);
    Some((target, launched))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Apps {
        apps: Vec<InstalledApp>,
        launched: Mutex<Vec<String>>,
        refuse: bool,
    }

    impl Apps {
        fn new(labels: &[(&str, &str)]) -> Self {
            Self {
                apps: labels.iter().map(|(l, p)| InstalledApp::new(*l, *p)).collect(),
                launched: Mutex::new(Vec::new()),
                refuse: false,
            }
        }
    }

    impl AppRegistry for Apps {
        fn installed_apps(&self) -> Vec<InstalledApp> {
            self.apps.clone()
        }
        fn launch(&self, package: &str) -> bool {
            if self.refuse {
                return false;
            }
            self.launched.lock().unwrap().push(package.to_string());
            true
        }
    }

    fn catalog() -> Vec<InstalledApp> {
        vec![
            InstalledApp::new("Maps", "com.maps"),
            InstalledApp::new("Google Maps", "com.google.maps"),
            InstalledApp::new("Spotify", "com.spotify.music"),
            InstalledApp::new("Spotify Lite", "com.spotify.lite"),
        ]
    }

    #[test]
    fn exact_match_wins_over_longer_containing_label() {
        let apps = catalog();
        assert_eq!(resolve_app("spotify", &apps).unwrap().package, "com.spotify.music");
        assert_eq!(resolve_app("MAPS", &apps).unwrap().package, "com.maps");
    }

    #[test]
    fn containment_prefers_longest_label() {
        let apps = catalog();
        // "google" is contained only in "Google Maps".
        assert_eq!(resolve_app("google", &apps).unwrap().package, "com.google.maps");
        // Target contains both "Maps" and "Google Maps": longest wins.
        assert_eq!(resolve_app("open google maps now", &apps).unwrap().package, "com.google.maps");
    }

    #[test]
    fn equal_length_tie_keeps_first() {
        let apps = vec![InstalledApp::new("Notes A", "a"), InstalledApp::new("Notes B", "b")];
        assert_eq!(resolve_app("notes", &apps).unwrap().package, "a");
    }

    #[test]
    fn no_match_is_not_found() {
        let apps = catalog();
        assert_eq!(
            resolve_app("Calculator", &apps),
            Err(ToolDispatchError::AppNotFound("Calculator".into()))
        );
        assert!(resolve_app("  ", &apps).is_err());
    }

    #[test]
    fn handle_launch_dispatches_first_target() {
        let registry = Apps::new(&[("Spotify", "com.spotify.music")]);
        let outcome = handle_launch("Sure! [LAUNCH:Spotify] [LAUNCH:Maps]", &registry);
        assert_eq!(outcome, Some(("Spotify".to_string(), true)));
        assert_eq!(*registry.launched.lock().unwrap(), vec!["com.spotify.music"]);
    }

    #[test]
    fn unknown_or_refused_launch_reports_false() {
        let registry = Apps::new(&[("Spotify", "com.spotify.music")]);
        assert!(!dispatch_launch("Calculator", &registry));

        let mut refusing = Apps::new(&[("Spotify", "com.spotify.music")]);
        refusing.refuse = true;
        assert!(!dispatch_launch("Spotify", &refusing));
        assert_eq!(handle_launch("no command", &registry), None);
    }
}
