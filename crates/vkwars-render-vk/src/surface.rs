//! Surface configuration negotiation: pure functions over a [`SurfaceSupport`]
//! snapshot, so every (re)build picks from what the surface reports right now.

use crate::error::{RenderError, RenderResult};
use crate::gpu::SurfaceSupport;
use ash::vk;

pub const PREFERRED_SURFACE_FORMATS: [vk::Format; 5] = [
    vk::Format::R8G8B8_SRGB,
    vk::Format::R8G8B8A8_SRGB,
    vk::Format::B8G8R8_SRGB,
    vk::Format::B8G8R8A8_SRGB,
    vk::Format::A8B8G8R8_SRGB_PACK32,
];

pub const PREFERRED_PRESENT_MODES: [vk::PresentModeKHR; 2] =
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO];

pub const PREFERRED_COMPOSITE_ALPHA: [vk::CompositeAlphaFlagsKHR; 2] = [
    vk::CompositeAlphaFlagsKHR::OPAQUE,
    vk::CompositeAlphaFlagsKHR::INHERIT,
];

pub const PREFERRED_DEPTH_FORMATS: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::X8_D24_UNORM_PACK32,
];

pub const DESIRED_IMAGE_COUNT: u32 = 3;

/// Ordered preference lists. The first supported entry of each list wins.
#[derive(Clone, Debug)]
pub struct SurfacePreferences {
    pub formats: Vec<vk::Format>,
    pub present_modes: Vec<vk::PresentModeKHR>,
    pub composite_alpha: Vec<vk::CompositeAlphaFlagsKHR>,
    pub depth_formats: Vec<vk::Format>,
    pub image_count: u32,
}

impl Default for SurfacePreferences {
    fn default() -> Self {
        Self {
            formats: PREFERRED_SURFACE_FORMATS.to_vec(),
            present_modes: PREFERRED_PRESENT_MODES.to_vec(),
            composite_alpha: PREFERRED_COMPOSITE_ALPHA.to_vec(),
            depth_formats: PREFERRED_DEPTH_FORMATS.to_vec(),
            image_count: DESIRED_IMAGE_COUNT,
        }
    }
}

impl SurfacePreferences {
    pub fn with_present_modes(mut self, modes: Vec<vk::PresentModeKHR>) -> Self {
        self.present_modes = modes;
        self
    }

    pub fn with_image_count(mut self, count: u32) -> Self {
        self.image_count = count;
        self
    }
}

/// Everything a swapchain build needs, negotiated against the live surface.
#[derive(Clone, Copy, Debug)]
pub struct SurfaceConfig {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub composite_alpha: vk::CompositeAlphaFlagsKHR,
    pub depth_format: vk::Format,
    pub image_count: u32,
    pub extent: vk::Extent2D,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

pub fn negotiate(
    support: &SurfaceSupport,
    prefs: &SurfacePreferences,
    extent_hint: vk::Extent2D,
    depth_supported: impl Fn(vk::Format) -> bool,
) -> RenderResult<SurfaceConfig> {
    let caps = &support.capabilities;
    Ok(SurfaceConfig {
        surface_format: select_surface_format(&support.formats, &prefs.formats)?,
        present_mode: select_present_mode(&support.present_modes, &prefs.present_modes)?,
        composite_alpha: select_composite_alpha(
            caps.supported_composite_alpha,
            &prefs.composite_alpha,
        )?,
        depth_format: select_depth_format(&prefs.depth_formats, depth_supported)?,
        image_count: compute_image_count(
            prefs.image_count,
            caps.min_image_count,
            caps.max_image_count,
        ),
        extent: extent_from_caps(caps, extent_hint),
        pre_transform: caps.current_transform,
    })
}

/// First reported format that appears in the preference list, in preference
/// order; otherwise whatever the surface lists first.
pub fn select_surface_format(
    available: &[vk::SurfaceFormatKHR],
    preferred: &[vk::Format],
) -> RenderResult<vk::SurfaceFormatKHR> {
    preferred
        .iter()
        .find_map(|want| available.iter().copied().find(|f| f.format == *want))
        .or_else(|| available.first().copied())
        .ok_or(RenderError::NoSurfaceFormat)
}

/// FIFO is tried last even when the preference list leaves it out.
pub fn select_present_mode(
    available: &[vk::PresentModeKHR],
    preferred: &[vk::PresentModeKHR],
) -> RenderResult<vk::PresentModeKHR> {
    preferred
        .iter()
        .copied()
        .chain(std::iter::once(vk::PresentModeKHR::FIFO))
        .find(|m| available.contains(m))
        .ok_or(RenderError::NoPresentMode)
}

pub fn select_composite_alpha(
    supported: vk::CompositeAlphaFlagsKHR,
    preferred: &[vk::CompositeAlphaFlagsKHR],
) -> RenderResult<vk::CompositeAlphaFlagsKHR> {
    preferred
        .iter()
        .copied()
        .find(|a| supported.contains(*a))
        .ok_or(RenderError::NoCompositeAlpha)
}

pub fn select_depth_format(
    preferred: &[vk::Format],
    supported: impl Fn(vk::Format) -> bool,
) -> RenderResult<vk::Format> {
    preferred
        .iter()
        .copied()
        .find(|f| supported(*f))
        .ok_or(RenderError::NoDepthFormat)
}

/// `max(desired, min + 1)`, clamped to `max` unless the surface reports no
/// upper bound (`max == 0`).
pub fn compute_image_count(desired: u32, min: u32, max: u32) -> u32 {
    let count = desired.max(min + 1);
    if max != 0 {
        count.min(max)
    } else {
        count
    }
}

/// The surface's own extent wins; the hint is only used when the surface
/// reports the "size decided by the swapchain" sentinel.
pub fn extent_from_caps(caps: &vk::SurfaceCapabilitiesKHR, hint: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: hint
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: hint
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn srgb(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    #[test]
    fn fifo_only_surface_gets_fifo() {
        let mode = select_present_mode(&[vk::PresentModeKHR::FIFO], &PREFERRED_PRESENT_MODES);
        assert_eq!(mode.unwrap(), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn mailbox_wins_when_preferred_and_available() {
        let available = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        let mode = select_present_mode(&available, &PREFERRED_PRESENT_MODES).unwrap();
        assert_eq!(mode, vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn fifo_is_terminal_fallback_even_when_not_listed() {
        let available = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::FIFO_RELAXED];
        let mode = select_present_mode(&available, &[vk::PresentModeKHR::IMMEDIATE]).unwrap();
        assert_eq!(mode, vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn no_present_mode_is_an_error() {
        let err = select_present_mode(&[], &PREFERRED_PRESENT_MODES).unwrap_err();
        assert!(matches!(err, RenderError::NoPresentMode));
    }

    #[test]
    fn image_count_respects_unbounded_and_bounded_max() {
        assert_eq!(compute_image_count(3, 1, 0), 3);
        assert_eq!(compute_image_count(3, 1, 2), 2);
        assert_eq!(compute_image_count(3, 3, 0), 4);
        assert_eq!(compute_image_count(2, 2, 8), 3);
    }

    #[test]
    fn surface_format_follows_preference_order_then_first_reported() {
        let available = [
            srgb(vk::Format::B8G8R8A8_UNORM),
            srgb(vk::Format::B8G8R8A8_SRGB),
            srgb(vk::Format::R8G8B8A8_SRGB),
        ];
        let picked = select_surface_format(&available, &PREFERRED_SURFACE_FORMATS).unwrap();
        assert_eq!(picked.format, vk::Format::R8G8B8A8_SRGB);

        let odd = [srgb(vk::Format::A2B10G10R10_UNORM_PACK32)];
        let picked = select_surface_format(&odd, &PREFERRED_SURFACE_FORMATS).unwrap();
        assert_eq!(picked.format, vk::Format::A2B10G10R10_UNORM_PACK32);

        assert!(matches!(
            select_surface_format(&[], &PREFERRED_SURFACE_FORMATS),
            Err(RenderError::NoSurfaceFormat)
        ));
    }

    #[test]
    fn composite_alpha_prefers_opaque_then_inherit() {
        let both = vk::CompositeAlphaFlagsKHR::INHERIT | vk::CompositeAlphaFlagsKHR::OPAQUE;
        assert_eq!(
            select_composite_alpha(both, &PREFERRED_COMPOSITE_ALPHA).unwrap(),
            vk::CompositeAlphaFlagsKHR::OPAQUE
        );
        assert_eq!(
            select_composite_alpha(
                vk::CompositeAlphaFlagsKHR::INHERIT,
                &PREFERRED_COMPOSITE_ALPHA
            )
            .unwrap(),
            vk::CompositeAlphaFlagsKHR::INHERIT
        );
        assert!(matches!(
            select_composite_alpha(
                vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
                &PREFERRED_COMPOSITE_ALPHA
            ),
            Err(RenderError::NoCompositeAlpha)
        ));
    }

    #[test]
    fn depth_format_is_first_supported_or_fatal() {
        let only_packed = |f: vk::Format| f == vk::Format::X8_D24_UNORM_PACK32;
        assert_eq!(
            select_depth_format(&PREFERRED_DEPTH_FORMATS, only_packed).unwrap(),
            vk::Format::X8_D24_UNORM_PACK32
        );
        assert!(matches!(
            select_depth_format(&PREFERRED_DEPTH_FORMATS, |_| false),
            Err(RenderError::NoDepthFormat)
        ));
    }

    #[test]
    fn extent_uses_hint_only_for_free_size_surfaces() {
        let mut caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 640,
                height: 480,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 1024,
                height: 1024,
            },
            ..Default::default()
        };
        let hint = vk::Extent2D {
            width: 2000,
            height: 300,
        };
        assert_eq!(extent_from_caps(&caps, hint).width, 640);

        caps.current_extent = vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        };
        let e = extent_from_caps(&caps, hint);
        assert_eq!((e.width, e.height), (1024, 300));
    }

    #[test]
    fn negotiate_takes_current_transform_and_fresh_extent() {
        let support = SurfaceSupport {
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 0,
                current_extent: vk::Extent2D {
                    width: 800,
                    height: 600,
                },
                current_transform: vk::SurfaceTransformFlagsKHR::ROTATE_90,
                supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
                ..Default::default()
            },
            formats: vec![srgb(vk::Format::B8G8R8A8_SRGB)],
            present_modes: vec![vk::PresentModeKHR::FIFO],
            queue_family: 0,
            present_supported: true,
        };
        let cfg = negotiate(
            &support,
            &SurfacePreferences::default(),
            vk::Extent2D::default(),
            |f| f == vk::Format::D32_SFLOAT,
        )
        .unwrap();
        assert_eq!(cfg.image_count, 3);
        assert_eq!(cfg.extent.width, 800);
        assert_eq!(cfg.pre_transform, vk::SurfaceTransformFlagsKHR::ROTATE_90);
        assert_eq!(cfg.depth_format, vk::Format::D32_SFLOAT);
        assert_eq!(cfg.present_mode, vk::PresentModeKHR::FIFO);
    }
}
