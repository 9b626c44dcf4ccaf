use std::collections::BTreeMap;
use std::path::Path;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;
use std::thread;

use ctplot::data::{available_tables, TableSpecs};
use ctplot::{make_plot, Config, Figure, ParameterBag, Progress};

// ---------------------------------------------------------------------------
// Application state
// ---------------------------------------------------------------------------

/// A plot request running on a worker thread.
pub struct PendingPlot {
    pub progress: Arc<Progress>,
    result: Receiver<ctplot::Result<Figure>>,
}

/// The full UI state, independent of rendering.
pub struct AppState {
    pub config: Config,

    /// The request being edited.
    pub bag: ParameterBag,

    /// Tables found below the data directory, keyed `store:table`.
    pub tables: BTreeMap<String, TableSpecs>,

    /// Layer shown in the layer editor.
    pub selected_layer: usize,

    /// Last successfully composed figure.
    pub figure: Option<Figure>,

    pub pending: Option<PendingPlot>,

    /// Status / error message shown in the UI.
    pub status_message: Option<String>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let mut state = Self {
            config,
            bag: ParameterBag::new(),
            tables: BTreeMap::new(),
            selected_layer: 0,
            figure: None,
            pending: None,
            status_message: None,
        };
        state.refresh_tables();
        state
    }

    pub fn refresh_tables(&mut self) {
        match available_tables(&self.config.data_path()) {
            Ok(tables) => {
                log::info!("Found {} tables", tables.len());
                self.tables = tables;
            }
            Err(e) => {
                log::error!("Listing tables failed: {e}");
                self.status_message = Some(format!("Error: {e}"));
            }
        }
    }

    /// Compose the current bag on a worker thread.
    pub fn start_plot(&mut self) {
        if self.pending.is_some() {
            return;
        }
        let bag = self.bag.clone().sanitized();
        let config = self.config.clone();
        let progress = Progress::new();
        let worker_progress = Arc::clone(&progress);
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let result = make_plot(&bag, &config, worker_progress);
            // the receiver is gone when the app closed meanwhile
            let _ = tx.send(result);
        });
        self.status_message = None;
        self.pending = Some(PendingPlot {
            progress,
            result: rx,
        });
    }

    /// Pick up a finished plot. Returns true while one is still running.
    pub fn poll_plot(&mut self) -> bool {
        let Some(pending) = &self.pending else {
            return false;
        };
        match pending.result.try_recv() {
            Ok(Ok(figure)) => {
                log::info!("Plot ready with {} axes", figure.axes.len());
                self.figure = Some(figure);
                self.pending = None;
                false
            }
            Ok(Err(e)) => {
                log::error!("Plot failed: {e}");
                self.status_message = Some(format!("Error: {e}"));
                self.pending = None;
                false
            }
            Err(TryRecvError::Empty) => true,
            Err(TryRecvError::Disconnected) => {
                self.status_message = Some("Error: plot worker stopped".to_string());
                self.pending = None;
                false
            }
        }
    }

    pub fn load_session(&mut self, path: &Path) {
        match ParameterBag::load(path) {
            Ok(bag) => {
                log::info!("Loaded session {} ({} keys)", path.display(), bag.len());
                self.bag = bag.sanitized();
                self.status_message = None;
            }
            Err(e) => {
                log::error!("Failed to load session: {e}");
                self.status_message = Some(format!("Error: {e}"));
            }
        }
    }

    pub fn save_session(&mut self, path: &Path) {
        match self.bag.save(path) {
            Ok(()) => log::info!("Saved session {}", path.display()),
            Err(e) => {
                log::error!("Failed to save session: {e}");
                self.status_message = Some(format!("Error: {e}"));
            }
        }
    }

    // -----------------------------------------------------------------------
    // Layer options as editable text
    // -----------------------------------------------------------------------

    /// The `o{index}*` keys of a layer as `key=value` lines.
    pub fn layer_options_text(&self, index: usize) -> String {
        let prefix = format!("o{index}");
        self.bag
            .iter()
            .filter_map(|(k, v)| Some(format!("{}={v}", k.strip_prefix(&prefix)?)))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Replace the `o{index}*` keys from `key=value` lines; other lines are
    /// ignored.
    pub fn set_layer_options(&mut self, index: usize, text: &str) {
        let prefix = format!("o{index}");
        let old: Vec<String> = self
            .bag
            .iter()
            .filter(|(k, _)| k.starts_with(&prefix))
            .map(|(k, _)| k.to_string())
            .collect();
        for key in old {
            self.bag.remove(&key);
        }
        for line in text.lines() {
            if let Some((k, v)) = line.split_once('=') {
                let k = k.trim();
                if !k.is_empty() {
                    self.bag.insert(format!("{prefix}{k}"), v);
                }
            }
        }
    }
}
