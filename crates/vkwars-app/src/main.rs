// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use vkwars_core::init_tracing;
use vkwars_render::{
    configure_imgui, imgui, FrameStatus, RenderSize, Renderer, UiAtlas, UiDrawData,
};
use vkwars_render_vk::VkRenderer;

use vkwars_platform::imgui_winit_support::{HiDpiMode, WinitPlatform};
use vkwars_platform::winit::{
    application::ApplicationHandler,
    event::{Event, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    raw_window_handle::{HasDisplayHandle, HasWindowHandle},
    window::{Window, WindowId},
};

mod config;
mod hud;

use config::{load_cfg, AppCfg, PresentModeCfg, DEFAULT_CONFIG_PATH};
use hud::Hud;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (TOML)
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Put this present mode first in the preference list
    #[arg(long, value_enum)]
    present_mode: Option<PresentModeCfg>,
}

struct App {
    cfg: AppCfg,
    present_override: Option<PresentModeCfg>,

    window: Option<Window>,
    renderer: Option<VkRenderer>,
    render_size: RenderSize,
    imgui: imgui::Context,
    platform: WinitPlatform,
    atlas: UiAtlas,
    hud: Hud,

    exiting: bool,
    focused: bool,
    frames: u32,
    last_fps_instant: Instant,
    last_frame: Option<Instant>,
    next_frame_deadline: Option<Instant>,
}

impl App {
    fn new(cfg: AppCfg, present_override: Option<PresentModeCfg>) -> Self {
        let mut imgui = imgui::Context::create();
        let atlas = configure_imgui(&mut imgui);
        let platform = WinitPlatform::new(&mut imgui);
        App {
            cfg,
            present_override,
            window: None,
            renderer: None,
            render_size: RenderSize::default(),
            imgui,
            platform,
            atlas,
            hud: Hud::new(),
            exiting: false,
            focused: true,
            frames: 0,
            last_fps_instant: Instant::now(),
            last_frame: None,
            next_frame_deadline: None,
        }
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        self.exiting = true;
        // renderer before the window it presents to
        self.renderer = None;
        self.window = None;
        event_loop.exit();
    }

    fn create_renderer(&self, window: &Window) -> Result<VkRenderer> {
        let wh = window.window_handle()?;
        let dh = window.display_handle()?;
        let config = self.cfg.render.renderer_config(self.present_override);
        Ok(VkRenderer::with_config(
            &wh,
            &dh,
            self.render_size,
            &self.atlas,
            &config,
        )?)
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let (Some(window), Some(renderer)) = (&self.window, &mut self.renderer) else {
            return;
        };
        let now = Instant::now();
        if let Some(prev) = self.last_frame.replace(now) {
            self.hud.record(now - prev);
            self.imgui.io_mut().update_delta_time(now - prev);
        }

        if let Err(e) = self.platform.prepare_frame(self.imgui.io_mut(), window) {
            warn!("imgui prepare_frame: {e}");
        }
        let ui = self.imgui.new_frame();
        self.hud.build(ui);
        self.platform.prepare_render(ui, window);
        let draw_data = UiDrawData::from_imgui(self.imgui.render());

        match renderer.render(&draw_data) {
            Ok(FrameStatus::Presented { .. }) => {
                self.frames = self.frames.saturating_add(1);
            }
            Ok(FrameStatus::Skipped) => window.request_redraw(),
            Ok(FrameStatus::Suspended) => {}
            Err(e) => {
                error!("render error: {e:#}");
                self.shutdown(event_loop);
            }
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let window = match event_loop.create_window(vkwars_platform::main_window_attributes()) {
            Ok(w) => w,
            Err(e) => {
                error!("create_window failed: {e}");
                event_loop.exit();
                return;
            }
        };
        self.platform
            .attach_window(self.imgui.io_mut(), &window, HiDpiMode::Default);
        let size = window.inner_size();
        self.render_size = RenderSize {
            width: size.width,
            height: size.height,
        };

        match self.create_renderer(&window) {
            Ok(renderer) => self.renderer = Some(renderer),
            Err(e) => {
                error!("vulkan init failed: {e:#}");
                event_loop.exit();
                return;
            }
        }
        info!(
            "window {}x{}, present modes {:?}",
            size.width,
            size.height,
            self.cfg.render.present_modes(self.present_override)
        );

        event_loop.set_control_flow(ControlFlow::Poll);
        window.request_redraw();
        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
            let wrapped: Event<()> = Event::WindowEvent {
                window_id,
                event: event.clone(),
            };
            self.platform
                .handle_event(self.imgui.io_mut(), window, &wrapped);
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.shutdown(event_loop);
            }

            WindowEvent::Resized(new_size) => {
                self.render_size = RenderSize {
                    width: new_size.width,
                    height: new_size.height,
                };
                info!(
                    "Resized → {}x{} (minimized={})",
                    new_size.width,
                    new_size.height,
                    self.render_size.is_zero()
                );
                if let Some(renderer) = &mut self.renderer {
                    if let Err(e) = renderer.resize(self.render_size) {
                        warn!("resize: {e:#}");
                    }
                }
                if let Some(w) = &self.window {
                    w.request_redraw();
                }
            }

            WindowEvent::Focused(focused) => {
                if self.focused != focused {
                    self.focused = focused;
                    info!("Focused({focused})");
                    if focused {
                        self.next_frame_deadline = None;
                    }
                }
            }

            WindowEvent::RedrawRequested => {
                if !self.exiting {
                    self.redraw(event_loop);
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }
        let now = Instant::now();

        if self.render_size.is_zero() {
            // minimized: sleep until a resize arrives
            event_loop.set_control_flow(ControlFlow::Wait);
            self.last_frame = None;
        } else if !self.focused && self.cfg.render.unfocused_fps > 0 {
            let frame_dt = Duration::from_nanos(
                1_000_000_000u64 / self.cfg.render.unfocused_fps as u64,
            );
            match self.next_frame_deadline {
                Some(deadline) if now < deadline => {
                    event_loop.set_control_flow(ControlFlow::WaitUntil(deadline));
                }
                _ => {
                    let next = now + frame_dt;
                    self.next_frame_deadline = Some(next);
                    event_loop.set_control_flow(ControlFlow::WaitUntil(next));
                    if let Some(w) = &self.window {
                        w.request_redraw();
                    }
                }
            }
        } else {
            // presentation paces us
            event_loop.set_control_flow(ControlFlow::Poll);
            if let Some(w) = &self.window {
                w.request_redraw();
            }
        }

        if now.duration_since(self.last_fps_instant) >= Duration::from_secs(1) {
            info!("fps ~ {}", self.frames);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let cfg = load_cfg(&args.config);
    let event_loop: EventLoop<()> = EventLoop::new()?;

    let mut app = App::new(cfg, args.present_mode);
    event_loop.run_app(&mut app)?;
    Ok(())
}
