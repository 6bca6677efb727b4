//! End-to-end analysis scenarios.
//!
//! These run the full GPU pipeline, so they self-skip (with a notice on
//! stderr) on machines without a Vulkan device.

use std::path::{Path, PathBuf};

use flop::{AnalyzeRequest, Context, ContextOptions, Error, Tonemap, HISTOGRAM_BINS};

fn create_context() -> Option<Context> {
    let options = ContextOptions {
        validation: false,
        ..Default::default()
    };
    match Context::new(&options) {
        Ok(context) => Some(context),
        Err(err) => {
            eprintln!("skipping GPU test: {err}");
            None
        }
    }
}

fn write_solid_png(path: &Path, width: u32, height: u32, rgb: [u8; 3]) {
    let mut data = Vec::with_capacity((width * height * 4) as usize);
    for _ in 0..width * height {
        data.extend_from_slice(&[rgb[0], rgb[1], rgb[2], 255]);
    }
    image::save_buffer(path, &data, width, height, image::ColorType::Rgba8).unwrap();
}

fn write_gradient_png(path: &Path, width: u32, height: u32, shift: u32) {
    let mut data = Vec::with_capacity((width * height * 4) as usize);
    for _ in 0..height {
        for x in 0..width {
            let v = (((x + shift) * 255) / (width - 1).max(1)).min(255) as u8;
            data.extend_from_slice(&[v, v, v, 255]);
        }
    }
    image::save_buffer(path, &data, width, height, image::ColorType::Rgba8).unwrap();
}

fn write_solid_exr(path: &Path, width: u32, height: u32, rgb: [f32; 3]) {
    let mut img = image::Rgba32FImage::new(width, height);
    for pixel in img.pixels_mut() {
        *pixel = image::Rgba([rgb[0], rgb[1], rgb[2], 1.0]);
    }
    image::DynamicImage::ImageRgba32F(img).save(path).unwrap();
}

fn histogram_total(histogram: &[u32; HISTOGRAM_BINS]) -> u64 {
    histogram.iter().map(|&count| u64::from(count)).sum()
}

fn fixture(dir: &tempfile::TempDir, name: &str) -> PathBuf {
    dir.path().join(name)
}

#[test]
fn identical_images_land_entirely_in_bin_zero() {
    let Some(mut context) = create_context() else {
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    let reference = fixture(&dir, "reference.png");
    let test = fixture(&dir, "test.png");
    write_solid_png(&reference, 256, 256, [128, 128, 128]);
    write_solid_png(&test, 256, 256, [128, 128, 128]);

    let summary = context
        .analyze(&AnalyzeRequest::new(&reference, &test))
        .unwrap();

    assert_eq!(summary.width, 256);
    assert_eq!(summary.height, 256);
    assert_eq!(summary.histogram[0], 256 * 256);
    assert!(summary.histogram[1..].iter().all(|&count| count == 0));
}

#[test]
fn black_versus_white_concentrates_in_the_top_bins() {
    let Some(mut context) = create_context() else {
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    let reference = fixture(&dir, "black.png");
    let test = fixture(&dir, "white.png");
    write_solid_png(&reference, 256, 256, [0, 0, 0]);
    write_solid_png(&test, 256, 256, [255, 255, 255]);

    let summary = context
        .analyze(&AnalyzeRequest::new(&reference, &test))
        .unwrap();

    let total = histogram_total(&summary.histogram);
    assert_eq!(total, 256 * 256);

    // Max error of at least 0.9: some pixel lands in bin 28 or higher.
    let high: u64 = summary.histogram[28..]
        .iter()
        .map(|&count| u64::from(count))
        .sum();
    assert!(high > 0, "no pixel reached an error of 0.9");
    assert!(
        high * 10 >= total * 9,
        "black/white error should be concentrated near the top: {:?}",
        summary.histogram
    );
}

#[test]
fn single_pixel_shift_of_a_smooth_image_stays_low_error() {
    let Some(mut context) = create_context() else {
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    let reference = fixture(&dir, "gradient.png");
    let test = fixture(&dir, "gradient_shifted.png");
    write_gradient_png(&reference, 256, 256, 0);
    write_gradient_png(&test, 256, 256, 1);

    let summary = context
        .analyze(&AnalyzeRequest::new(&reference, &test))
        .unwrap();

    let total = histogram_total(&summary.histogram);
    assert_eq!(total, 256 * 256);

    // Bins 0..4 cover errors below 0.125; at most 10% may exceed 0.1.
    let low: u64 = summary.histogram[..4]
        .iter()
        .map(|&count| u64::from(count))
        .sum();
    assert!(
        low * 10 >= total * 9,
        "a one-pixel shift of a smooth gradient should stay low-error: {:?}",
        summary.histogram
    );
}

#[test]
fn histograms_are_deterministic_and_symmetric() {
    let Some(mut context) = create_context() else {
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    let reference = fixture(&dir, "gradient.png");
    let test = fixture(&dir, "gradient_shifted.png");
    write_gradient_png(&reference, 128, 128, 0);
    write_gradient_png(&test, 128, 128, 2);

    let first = context
        .analyze(&AnalyzeRequest::new(&reference, &test))
        .unwrap();
    let second = context
        .analyze(&AnalyzeRequest::new(&reference, &test))
        .unwrap();
    assert_eq!(first.histogram, second.histogram);

    let swapped = context
        .analyze(&AnalyzeRequest::new(&test, &reference))
        .unwrap();
    assert_eq!(first.histogram, swapped.histogram);
}

#[test]
fn output_png_is_written_and_readable() {
    let Some(mut context) = create_context() else {
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    let reference = fixture(&dir, "black.png");
    let test = fixture(&dir, "white.png");
    let output = fixture(&dir, "error.png");
    write_solid_png(&reference, 64, 48, [0, 0, 0]);
    write_solid_png(&test, 64, 48, [255, 255, 255]);

    let mut request = AnalyzeRequest::new(&reference, &test);
    request.output = Some(&output);
    context.analyze(&request).unwrap();

    let written = image::open(&output).unwrap().to_rgba8();
    assert_eq!(written.dimensions(), (64, 48));
    // Near-max error maps to the bright end of Magma, away from black.
    let center = written.get_pixel(32, 24);
    assert!(center.0[0] > 128, "expected a bright error color: {center:?}");
}

#[test]
fn no_output_is_written_without_a_path() {
    let Some(mut context) = create_context() else {
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    let reference = fixture(&dir, "a.png");
    let test = fixture(&dir, "b.png");
    write_solid_png(&reference, 32, 32, [10, 10, 10]);
    write_solid_png(&test, 32, 32, [10, 10, 10]);

    context
        .analyze(&AnalyzeRequest::new(&reference, &test))
        .unwrap();

    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .filter(|name| name != "a.png" && name != "b.png")
        .collect();
    assert!(leftovers.is_empty(), "unexpected outputs: {leftovers:?}");
}

#[test]
fn mismatched_extents_fail_with_the_exact_message() {
    let Some(mut context) = create_context() else {
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    let reference = fixture(&dir, "a.png");
    let test = fixture(&dir, "b.png");
    write_solid_png(&reference, 100, 100, [0, 0, 0]);
    write_solid_png(&test, 100, 101, [0, 0, 0]);

    let err = context
        .analyze(&AnalyzeRequest::new(&reference, &test))
        .unwrap_err();
    assert!(matches!(err, Error::ExtentMismatch));
    assert_eq!(
        err.to_string(),
        "Reference and test images do not have matching extents."
    );
}

#[test]
fn missing_reference_fails_with_the_exact_message() {
    let Some(mut context) = create_context() else {
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    let reference = fixture(&dir, "missing.png");
    let test = fixture(&dir, "present.png");
    write_solid_png(&test, 16, 16, [0, 0, 0]);

    let err = context
        .analyze(&AnalyzeRequest::new(&reference, &test))
        .unwrap_err();
    assert!(matches!(err, Error::InvalidReferencePath));
    assert_eq!(err.to_string(), "Invalid reference path.");
}

#[test]
fn identical_hdr_images_tonemap_symmetrically() {
    let Some(mut context) = create_context() else {
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    let reference = fixture(&dir, "reference.exr");
    let test = fixture(&dir, "test.exr");
    write_solid_exr(&reference, 64, 64, [2.5, 1.0, 0.25]);
    write_solid_exr(&test, 64, 64, [2.5, 1.0, 0.25]);

    let mut request = AnalyzeRequest::new(&reference, &test);
    request.exposure_stops = -2.0;
    request.tonemap = Some(Tonemap::Aces);
    let summary = context.analyze(&request).unwrap();

    assert_eq!(summary.histogram[0], 64 * 64);
    assert!(summary.histogram[1..].iter().all(|&count| count == 0));
}
