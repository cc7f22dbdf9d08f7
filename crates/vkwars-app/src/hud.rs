// SPDX-License-Identifier: CEPL-1.0
use std::collections::VecDeque;
use std::time::Duration;
use vkwars_render::imgui::{Condition, Ui};

pub const HISTORY_LEN: usize = 120;
const WINDOW_POS: [f32; 2] = [12.0, 12.0];
const GRAPH_SIZE: [f32; 2] = [240.0, 60.0];
// graph saturates at 2x a 60 Hz frame
const GRAPH_FULL_SCALE_MS: f32 = 33.3;

/// Frame-time overlay: fps readout, a frame-time graph and toggles for the
/// imgui demo and metrics windows.
pub struct Hud {
    history_ms: VecDeque<f32>,
    show_demo: bool,
    show_metrics: bool,
}

impl Hud {
    pub fn new() -> Self {
        Self {
            history_ms: VecDeque::with_capacity(HISTORY_LEN),
            show_demo: false,
            show_metrics: false,
        }
    }

    pub fn record(&mut self, frame_time: Duration) {
        if self.history_ms.len() == HISTORY_LEN {
            self.history_ms.pop_front();
        }
        self.history_ms.push_back(frame_time.as_secs_f32() * 1000.0);
    }

    pub fn average_ms(&self) -> Option<f32> {
        if self.history_ms.is_empty() {
            return None;
        }
        Some(self.history_ms.iter().sum::<f32>() / self.history_ms.len() as f32)
    }

    pub fn build(&mut self, ui: &Ui) {
        let summary = match self.average_ms() {
            Some(ms) if ms > 0.0 => format!("{:.0} fps  {ms:.2} ms", 1000.0 / ms),
            _ => String::from("waiting for frames"),
        };
        let samples: &[f32] = self.history_ms.make_contiguous();
        let show_demo = &mut self.show_demo;
        let show_metrics = &mut self.show_metrics;

        ui.window("frame timing")
            .position(WINDOW_POS, Condition::FirstUseEver)
            .always_auto_resize(true)
            .build(|| {
                ui.text(&summary);
                ui.plot_lines("##frame-times", samples)
                    .scale_min(0.0)
                    .scale_max(GRAPH_FULL_SCALE_MS)
                    .graph_size(GRAPH_SIZE)
                    .build();
                ui.checkbox("demo window", show_demo);
                ui.checkbox("metrics window", show_metrics);
            });

        if self.show_demo {
            ui.show_demo_window(&mut self.show_demo);
        }
        if self.show_metrics {
            ui.show_metrics_window(&mut self.show_metrics);
        }
    }
}

impl Default for Hud {
    fn default() -> Self {
        Self::new()
    }
}
