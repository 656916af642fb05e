use ash::vk;

///Converts an extent to the far corner offset, as needed by blit regions.
///
/// If `zero_to_one` is set, axis that are 0 in the extent become 1. This is the requirement on the `dst_offsets` parameter
/// of image blits.
pub fn extent_to_offset(extent: vk::Extent2D, zero_to_one: bool) -> vk::Offset3D {
    if zero_to_one {
        vk::Offset3D {
            x: (extent.width as i32).max(1),
            y: (extent.height as i32).max(1),
            z: 1,
        }
    } else {
        vk::Offset3D {
            x: extent.width as i32,
            y: extent.height as i32,
            z: 1,
        }
    }
}

///Viewport covering `extent` with the default depth range.
pub fn full_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

pub fn full_rect(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

///Splits `extent` into the viewport of one quadrant. `0` is top left, `3` bottom right.
pub fn quadrant_viewport(extent: vk::Extent2D, quadrant: u32) -> vk::Viewport {
    let half_w = extent.width as f32 / 2.0;
    let half_h = extent.height as f32 / 2.0;
    vk::Viewport {
        x: if quadrant % 2 == 1 { half_w } else { 0.0 },
        y: if quadrant >= 2 { half_h } else { 0.0 },
        width: half_w,
        height: half_h,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blit_offsets_never_collapse() {
        let o = extent_to_offset(
            vk::Extent2D {
                width: 0,
                height: 16,
            },
            true,
        );
        assert_eq!((o.x, o.y, o.z), (1, 16, 1));
    }

    #[test]
    fn quadrants_tile_the_extent() {
        let extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        let lower_right = quadrant_viewport(extent, 3);
        assert_eq!(lower_right.x, 400.0);
        assert_eq!(lower_right.y, 300.0);
        assert_eq!(lower_right.width, 400.0);
        let full = full_viewport(extent);
        assert_eq!(full.height, 600.0);
    }
}
