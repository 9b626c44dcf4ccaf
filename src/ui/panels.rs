use eframe::egui::{self, Color32, RichText, ScrollArea, Ui};

use ctplot::layer::{Mode, LAYER_COUNT};

use crate::color::layer_color;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Left side panel – layer and figure settings
// ---------------------------------------------------------------------------

/// Single-line editor bound to one bag key.
fn bag_field(ui: &mut Ui, state: &mut AppState, key: &str, label: &str) {
    let mut value = state.bag.raw(key).unwrap_or_default().to_string();
    ui.horizontal(|ui: &mut Ui| {
        ui.label(label);
        if ui.text_edit_singleline(&mut value).changed() {
            state.bag.insert(key, value.clone());
        }
    });
}

/// Render the left settings panel.
pub fn side_panel(ui: &mut Ui, state: &mut AppState) {
    ScrollArea::vertical()
        .auto_shrink([false, false])
        .show(ui, |ui: &mut Ui| {
            ui.heading("Layers");
            ui.horizontal_wrapped(|ui: &mut Ui| {
                for i in 0..LAYER_COUNT {
                    let active = state.bag.get(&format!("m{i}")).is_some()
                        && state.bag.get(&format!("s{i}")).is_some();
                    let mut text = RichText::new(i.to_string());
                    if active {
                        text = text.color(layer_color(i)).strong();
                    }
                    if ui.selectable_label(state.selected_layer == i, text).clicked() {
                        state.selected_layer = i;
                    }
                }
            });
            ui.separator();
            layer_editor(ui, state);
            ui.separator();

            egui::CollapsingHeader::new(RichText::new("Figure").strong())
                .default_open(false)
                .show(ui, |ui: &mut Ui| {
                    bag_field(ui, state, "t", "title");
                    bag_field(ui, state, "f", "font size");
                    bag_field(ui, state, "w", "width");
                    bag_field(ui, state, "g", "grid");
                    bag_field(ui, state, "l", "legend");
                });

            egui::CollapsingHeader::new(RichText::new("Axes").strong())
                .default_open(false)
                .show(ui, |ui: &mut Ui| {
                    for suffix in ["", "tw"] {
                        for a in ['x', 'y', 'z'] {
                            if a == 'z' && !suffix.is_empty() {
                                continue;
                            }
                            ui.strong(format!("{a}{}", if suffix.is_empty() { "" } else { " twin" }));
                            bag_field(ui, state, &format!("{a}l{suffix}"), "label");
                            bag_field(ui, state, &format!("{a}r{suffix}"), "range");
                            bag_field(ui, state, &format!("{a}s{suffix}"), "scale");
                        }
                    }
                });
        });
}

fn layer_editor(ui: &mut Ui, state: &mut AppState) {
    let i = state.selected_layer;

    let mode_key = format!("m{i}");
    let current = state.bag.get(&mode_key).unwrap_or("").to_string();
    ui.horizontal(|ui: &mut Ui| {
        ui.label("mode");
        egui::ComboBox::from_id_salt("mode")
            .selected_text(if current.is_empty() { "off" } else { current.as_str() })
            .show_ui(ui, |ui: &mut Ui| {
                if ui.selectable_label(current.is_empty(), "off").clicked() {
                    state.bag.insert(mode_key.clone(), "");
                }
                for m in Mode::ALL {
                    let label = format!("{} ({})", m.as_str(), m.description());
                    if ui.selectable_label(current == m.as_str(), label).clicked() {
                        state.bag.insert(mode_key.clone(), m.as_str());
                    }
                }
            });
    });

    let source_key = format!("s{i}");
    let source = state.bag.get(&source_key).unwrap_or("").to_string();
    let tables: Vec<String> = state.tables.keys().cloned().collect();
    ui.horizontal(|ui: &mut Ui| {
        ui.label("source");
        egui::ComboBox::from_id_salt("source")
            .selected_text(if source.is_empty() { "none" } else { source.as_str() })
            .width(ui.available_width())
            .show_ui(ui, |ui: &mut Ui| {
                for t in &tables {
                    if ui.selectable_label(source == *t, t).clicked() {
                        state.bag.insert(source_key.clone(), t.clone());
                    }
                }
            });
    });
    if let Some(specs) = state.tables.get(&source) {
        let columns: Vec<String> = specs
            .colnames
            .iter()
            .zip(&specs.units)
            .map(|(c, u)| format!("{c} [{u}]"))
            .collect();
        ui.label(RichText::new(columns.join(", ")).small().weak());
    }

    for (field, label) in [
        ("x", "x"),
        ("y", "y"),
        ("z", "z"),
        ("c", "cut"),
        ("n", "name"),
        ("tw", "twin"),
        ("rw", "rate window"),
        ("rs", "rate shift"),
        ("rc", "rate weight"),
    ] {
        bag_field(ui, state, &format!("{field}{i}"), label);
    }
    bag_field(ui, state, &format!("x{i}b"), "x bins");
    bag_field(ui, state, &format!("y{i}b"), "y bins");

    ui.label("options (key=value per line)");
    let mut options = state.layer_options_text(i);
    if ui.text_edit_multiline(&mut options).changed() {
        state.set_layer_options(i, &options);
    }
}

// ---------------------------------------------------------------------------
// Top bar
// ---------------------------------------------------------------------------

/// Render the top menu / toolbar.
pub fn top_bar(ui: &mut Ui, state: &mut AppState) {
    egui::menu::bar(ui, |ui: &mut Ui| {
        ui.menu_button("Session", |ui: &mut Ui| {
            if ui.button("Load…").clicked() {
                load_session_dialog(state);
                ui.close_menu();
            }
            if ui.button("Save…").clicked() {
                save_session_dialog(state);
                ui.close_menu();
            }
            if ui.button("Clear").clicked() {
                state.bag = Default::default();
                ui.close_menu();
            }
        });

        ui.separator();

        let running = state.pending.is_some();
        if ui.add_enabled(!running, egui::Button::new("Plot")).clicked() {
            state.start_plot();
        }
        if ui.button("Rescan tables").clicked() {
            state.refresh_tables();
        }
        if let Some(pending) = &state.pending {
            ui.add(
                egui::ProgressBar::new(pending.progress.get() as f32)
                    .desired_width(160.0)
                    .show_percentage(),
            );
        }

        ui.separator();
        ui.label(format!("{} tables", state.tables.len()));

        if let Some(msg) = &state.status_message {
            ui.label(RichText::new(msg).color(Color32::RED));
        }
    });
}

// ---------------------------------------------------------------------------
// Session dialogs
// ---------------------------------------------------------------------------

pub fn load_session_dialog(state: &mut AppState) {
    let file = rfd::FileDialog::new()
        .set_title("Load session")
        .set_directory(state.config.session_path())
        .add_filter("Session", &["json"])
        .pick_file();
    if let Some(path) = file {
        state.load_session(&path);
    }
}

pub fn save_session_dialog(state: &mut AppState) {
    let file = rfd::FileDialog::new()
        .set_title("Save session")
        .set_directory(state.config.session_path())
        .add_filter("Session", &["json"])
        .set_file_name("session.json")
        .save_file();
    if let Some(path) = file {
        state.save_session(&path);
    }
}
