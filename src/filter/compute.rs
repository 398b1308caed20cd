//! Built-in CPU compute functions.
//!
//! Each function validates the buffer set it is handed before touching
//! pixels, so a mis-sized buffer yields a `ComputeError` instead of a panic.

use crate::error::ComputeError;
use crate::frame::FrameBuffer;

use super::FilterKind;

/// Split `outputs` into (working buffers, filter output) after checking every
/// buffer against the shapes `kind` declares for `input`.
fn split_checked<'a>(
    kind: FilterKind,
    input: &FrameBuffer,
    outputs: &'a mut [FrameBuffer],
) -> Result<(&'a mut [FrameBuffer], &'a mut FrameBuffer), ComputeError> {
    let specs = kind.resources();
    if outputs.len() != specs.len() + 1 {
        return Err(ComputeError::BufferCount {
            expected: specs.len() + 1,
            actual: outputs.len(),
        });
    }
    if !input.layout().is_8bit() {
        return Err(ComputeError::Processing(format!(
            "{} supports 8-bit layouts only",
            kind
        )));
    }
    let (output, working) = outputs
        .split_last_mut()
        .ok_or(ComputeError::BufferCount {
            expected: specs.len() + 1,
            actual: 0,
        })?;
    if output.shape() != input.shape() {
        return Err(ComputeError::RegionMismatch {
            name: "output",
            expected: input.shape(),
            actual: output.shape(),
        });
    }
    for (spec, buf) in specs.iter().zip(working.iter()) {
        let expected = spec.shape_for(input.shape());
        if buf.shape() != expected {
            return Err(ComputeError::RegionMismatch {
                name: spec.name,
                expected,
                actual: buf.shape(),
            });
        }
    }
    Ok((working, output))
}

/// Pass-through copy of the input.
pub fn identity(input: &FrameBuffer, outputs: &mut [FrameBuffer]) -> Result<(), ComputeError> {
    let (_, output) = split_checked(FilterKind::Identity, input, outputs)?;
    output
        .copy_from(input)
        .map_err(|e| ComputeError::Processing(e.to_string()))
}

/// BT.601 luma into the `gray` plane, then expanded back to the input's
/// channel count. A fourth channel is treated as alpha and preserved.
pub fn grayscale(input: &FrameBuffer, outputs: &mut [FrameBuffer]) -> Result<(), ComputeError> {
    let (working, output) = split_checked(FilterKind::Grayscale, input, outputs)?;
    let gray = &mut working[0];
    let channels = input.layout().channels as usize;

    for (luma, px) in gray
        .pixels_mut()
        .iter_mut()
        .zip(input.pixels().chunks_exact(channels))
    {
        *luma = match channels {
            1 | 2 => px[0],
            _ => {
                let weighted = 77 * px[0] as u32 + 150 * px[1] as u32 + 29 * px[2] as u32;
                ((weighted + 128) >> 8) as u8
            }
        };
    }

    for ((dst, src), &luma) in output
        .pixels_mut()
        .chunks_exact_mut(channels)
        .zip(input.pixels().chunks_exact(channels))
        .zip(gray.pixels())
    {
        for (c, value) in dst.iter_mut().enumerate() {
            *value = if channels == 4 && c == 3 { src[3] } else { luma };
        }
    }
    Ok(())
}

/// 3x3 Sobel magnitude per channel: horizontal derivative into `gradient-x`,
/// vertical into `gradient-y`, saturating sum into the output. Border pixels
/// are zero.
pub fn edge_gradient(input: &FrameBuffer, outputs: &mut [FrameBuffer]) -> Result<(), ComputeError> {
    let (working, output) = split_checked(FilterKind::EdgeGradient, input, outputs)?;
    let (grad_x, rest) = working.split_at_mut(1);
    let grad_x = &mut grad_x[0];
    let grad_y = &mut rest[0];

    let width = input.width() as usize;
    let height = input.height() as usize;
    let bpp = input.layout().bytes_per_pixel();
    let stride = input.stride();
    let src = input.pixels();

    grad_x.fill(0);
    grad_y.fill(0);
    if width >= 3 && height >= 3 {
        let gx = grad_x.pixels_mut();
        for y in 1..height - 1 {
            for x in 1..width - 1 {
                for c in 0..bpp {
                    let at = |dx: usize, dy: usize| -> i32 {
                        src[(y + dy - 1) * stride + (x + dx - 1) * bpp + c] as i32
                    };
                    let sx = (at(2, 0) + 2 * at(2, 1) + at(2, 2))
                        - (at(0, 0) + 2 * at(0, 1) + at(0, 2));
                    gx[y * stride + x * bpp + c] = sx.unsigned_abs().min(255) as u8;
                }
            }
        }
        let gy = grad_y.pixels_mut();
        for y in 1..height - 1 {
            for x in 1..width - 1 {
                for c in 0..bpp {
                    let at = |dx: usize, dy: usize| -> i32 {
                        src[(y + dy - 1) * stride + (x + dx - 1) * bpp + c] as i32
                    };
                    let sy = (at(0, 2) + 2 * at(1, 2) + at(2, 2))
                        - (at(0, 0) + 2 * at(1, 0) + at(2, 0));
                    gy[y * stride + x * bpp + c] = sy.unsigned_abs().min(255) as u8;
                }
            }
        }
    }

    for ((out, &x), &y) in output
        .pixels_mut()
        .iter_mut()
        .zip(grad_x.pixels())
        .zip(grad_y.pixels())
    {
        *out = x.saturating_add(y);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameShape, PixelLayout};

    fn buffers_for(kind: FilterKind, shape: FrameShape) -> Vec<FrameBuffer> {
        let mut bufs: Vec<FrameBuffer> = kind
            .resources()
            .iter()
            .map(|spec| FrameBuffer::new(spec.shape_for(shape)).unwrap())
            .collect();
        bufs.push(FrameBuffer::new(shape).unwrap());
        bufs
    }

    fn solid(shape: FrameShape, px: &[u8]) -> FrameBuffer {
        let data = px
            .iter()
            .copied()
            .cycle()
            .take(shape.byte_len().unwrap())
            .collect();
        FrameBuffer::from_pixels(shape, data).unwrap()
    }

    #[test]
    fn identity_copies_input() {
        let shape = FrameShape::new(3, 2, PixelLayout::RGB8);
        let input = solid(shape, &[10, 20, 30]);
        let mut outputs = buffers_for(FilterKind::Identity, shape);
        identity(&input, &mut outputs).unwrap();
        assert_eq!(outputs[0], input);
    }

    #[test]
    fn grayscale_writes_plane_and_expanded_output() {
        let shape = FrameShape::new(2, 2, PixelLayout::RGB8);
        let input = solid(shape, &[255, 0, 0]);
        let mut outputs = buffers_for(FilterKind::Grayscale, shape);
        grayscale(&input, &mut outputs).unwrap();

        // (77 * 255 + 128) >> 8
        assert!(outputs[0].pixels().iter().all(|&p| p == 77));
        assert!(outputs[1].pixels().iter().all(|&p| p == 77));
    }

    #[test]
    fn grayscale_keeps_alpha_channel() {
        let shape = FrameShape::new(1, 1, PixelLayout::RGBA8);
        let input = solid(shape, &[100, 100, 100, 42]);
        let mut outputs = buffers_for(FilterKind::Grayscale, shape);
        grayscale(&input, &mut outputs).unwrap();
        assert_eq!(outputs[1].pixels(), &[100, 100, 100, 42]);
    }

    #[test]
    fn edge_gradient_is_zero_on_flat_input() {
        let shape = FrameShape::new(5, 5, PixelLayout::RGB8);
        let input = solid(shape, &[90, 90, 90]);
        let mut outputs = buffers_for(FilterKind::EdgeGradient, shape);
        edge_gradient(&input, &mut outputs).unwrap();
        assert!(outputs.iter().all(|b| b.pixels().iter().all(|&p| p == 0)));
    }

    #[test]
    fn edge_gradient_responds_to_vertical_edge() {
        let shape = FrameShape::new(4, 3, PixelLayout::GRAY8);
        // Columns: 0 0 | 100 100
        let input = FrameBuffer::from_pixels(
            shape,
            vec![0, 0, 100, 100, 0, 0, 100, 100, 0, 0, 100, 100],
        )
        .unwrap();
        let mut outputs = buffers_for(FilterKind::EdgeGradient, shape);
        edge_gradient(&input, &mut outputs).unwrap();

        let grad_x = outputs[0].row(1);
        assert_eq!(grad_x, &[0, 255, 255, 0]);
        assert!(outputs[1].pixels().iter().all(|&p| p == 0));
        assert_eq!(outputs[2].row(1), &[0, 255, 255, 0]);
        assert_eq!(outputs[2].row(0), &[0, 0, 0, 0]);
    }

    #[test]
    fn rejects_mis_sized_buffers() {
        let shape = FrameShape::new(4, 4, PixelLayout::RGB8);
        let input = FrameBuffer::new(shape).unwrap();

        let mut too_few = vec![FrameBuffer::new(shape).unwrap()];
        assert_eq!(
            edge_gradient(&input, &mut too_few),
            Err(ComputeError::BufferCount {
                expected: 3,
                actual: 1
            })
        );

        let mut wrong_gray = vec![
            FrameBuffer::new(shape).unwrap(),
            FrameBuffer::new(shape).unwrap(),
        ];
        assert!(matches!(
            grayscale(&input, &mut wrong_gray),
            Err(ComputeError::RegionMismatch { name: "gray", .. })
        ));
    }
}
