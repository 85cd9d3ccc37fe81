//! Local recognition model selection.
//!
//! Three tiers are probed in strict order and the first success is memoized
//! for the process: the platform's object-understanding model (gated by OS
//! and a capability check), a bundled FastVLM artifact, and finally the
//! generic built-in classifier. Load errors never propagate; a tier that
//! fails to load simply falls through to the next one.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use ort::session::{builder::GraphOptimizationLevel, Session};
use serde::Serialize;
use thiserror::Error;

/// Forces the platform capability gate open, for hosts where detection by
/// component path is unreliable.
const FORCE_SYSTEM_ENV: &str = "LEXILENS_FORCE_SYSTEM_MODEL";
/// Overrides the system model location, checked before all other candidates.
const SYSTEM_MODEL_PATH_ENV: &str = "LEXILENS_SYSTEM_MODEL_PATH";

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Model load failed: {0}")]
    Load(#[from] ort::Error),
}

/// One ranked strategy in the fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    System,
    Bundled,
    Builtin,
}

impl ModelTier {
    pub fn display_name(self) -> &'static str {
        match self {
            ModelTier::System => "System Intelligence",
            ModelTier::Bundled => "FastVLM",
            ModelTier::Builtin => "Built-in Classifier",
        }
    }

    pub fn detail(self) -> &'static str {
        match self {
            ModelTier::System => "Platform object-understanding model",
            ModelTier::Bundled => "Bundled FastVLM artifact",
            ModelTier::Builtin => "Generic classifier fallback",
        }
    }
}

/// The chosen tier plus its loaded session. The builtin tier carries no
/// session; recognition then goes through the generic classifier.
#[derive(Clone)]
pub struct ModelSelection {
    pub tier: ModelTier,
    pub session: Option<Arc<Session>>,
}

/// Candidate artifact locations, injectable for tests.
#[derive(Debug, Clone)]
pub struct ModelPaths {
    /// Directory holding models shipped with the application.
    pub models_dir: PathBuf,
    /// Fixed platform locations for the system model, probed in order.
    pub system_candidates: Vec<PathBuf>,
    /// Presence of this path counts as system-model capability.
    pub system_component: PathBuf,
}

impl Default for ModelPaths {
    fn default() -> Self {
        let models_dir = dirs::home_dir()
            .unwrap_or_default()
            .join(".lexilens")
            .join("models");
        Self {
            models_dir,
            system_candidates: vec![
                PathBuf::from("/Library/Application Support/LexiLens/object-understanding.ort"),
                PathBuf::from("/usr/local/share/lexilens/object-understanding.ort"),
            ],
            system_component: PathBuf::from(
                "/System/Library/PrivateFrameworks/VisionCore.framework",
            ),
        }
    }
}

#[derive(Default)]
struct CachedSelection {
    selection: Option<ModelSelection>,
    current_tier: Option<ModelTier>,
}

/// Picks the best available recognition model once and caches the choice for
/// the process lifetime.
pub struct ModelSelector {
    paths: ModelPaths,
    cached: Mutex<CachedSelection>,
}

impl ModelSelector {
    pub fn new(paths: ModelPaths) -> Self {
        Self {
            paths,
            cached: Mutex::new(CachedSelection::default()),
        }
    }

    /// The tier of the memoized selection; `Builtin` until a selection has
    /// been made.
    pub fn current_tier(&self) -> ModelTier {
        self.cached
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .current_tier
            .unwrap_or(ModelTier::Builtin)
    }

    pub fn preferred_model(&self) -> ModelSelection {
        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(selection) = &cached.selection {
            log::debug!("Using cached model selection: {}", selection.tier.display_name());
            return selection.clone();
        }

        let selection = self
            .probe_system_tier()
            .or_else(|| self.probe_bundled_tier())
            .unwrap_or_else(|| {
                log::info!("Falling back to the built-in classifier");
                ModelSelection {
                    tier: ModelTier::Builtin,
                    session: None,
                }
            });

        cached.current_tier = Some(selection.tier);
        cached.selection = Some(selection.clone());
        selection
    }

    /// Clears the memoized choice, forcing re-evaluation on the next request.
    pub fn reset_cached_selection(&self) {
        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        cached.selection = None;
        cached.current_tier = None;
    }

    fn probe_system_tier(&self) -> Option<ModelSelection> {
        if !self.supports_system_model() {
            log::debug!("System model not supported on this host");
            return None;
        }

        let path = self.system_model_path()?;
        log::info!("Found system model at {:?}", path);
        let session = match load_model(&path) {
            Ok(session) => session,
            Err(e) => {
                log::error!("Failed to load system model at {:?}: {}", path, e);
                return None;
            }
        };

        Some(ModelSelection {
            tier: ModelTier::System,
            session: Some(Arc::new(session)),
        })
    }

    fn supports_system_model(&self) -> bool {
        if !cfg!(target_os = "macos") {
            return false;
        }
        if std::env::var(FORCE_SYSTEM_ENV).as_deref() == Ok("1") {
            return true;
        }
        self.paths.system_component.exists()
    }

    fn system_model_path(&self) -> Option<PathBuf> {
        if let Ok(override_path) = std::env::var(SYSTEM_MODEL_PATH_ENV) {
            let path = PathBuf::from(override_path);
            if path.exists() {
                return Some(path);
            }
        }

        let bundled = self.paths.models_dir.join("object-understanding.ort");
        if bundled.exists() {
            return Some(bundled);
        }

        self.paths
            .system_candidates
            .iter()
            .find(|path| path.exists())
            .cloned()
    }

    fn probe_bundled_tier(&self) -> Option<ModelSelection> {
        let candidates = [
            self.paths.models_dir.join("fastvlm.ort"),
            self.paths.models_dir.join("fastvlm.onnx"),
        ];
        let path = match candidates.iter().find(|path| path.exists()) {
            Some(path) => path,
            None => {
                log::info!("No bundled FastVLM artifact in {:?}", self.paths.models_dir);
                return None;
            }
        };

        match load_model(path) {
            Ok(session) => Some(ModelSelection {
                tier: ModelTier::Bundled,
                session: Some(Arc::new(session)),
            }),
            Err(e) => {
                log::error!("Failed to load bundled model at {:?}: {}", path, e);
                None
            }
        }
    }
}

/// A raw `.onnx` graph goes through full graph optimization before the
/// session commits; a pre-optimized `.ort` artifact commits as-is.
fn load_model(path: &Path) -> Result<Session, ModelError> {
    let raw_graph = path.extension().is_some_and(|ext| ext == "onnx");
    let level = if raw_graph {
        GraphOptimizationLevel::Level3
    } else {
        GraphOptimizationLevel::Disable
    };

    let session = Session::builder()?
        .with_optimization_level(level)?
        .commit_from_file(path)?;
    Ok(session)
}
