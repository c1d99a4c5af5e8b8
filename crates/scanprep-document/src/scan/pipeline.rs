// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Pipeline orchestrator: decode, run the enabled corrections in order,
// binarize, and store the artifacts of one image.
//
// Loaded -> Deskewed? -> ContrastEnhanced? -> Denoised? -> Sharpened?
//        -> Binarized? -> Emitted | Failed
//
// Correction steps are fail-soft: a failing step leaves the previous buffer
// in place. Decode and storage failures end the run with a `Failure`.

use std::time::Instant;

use chrono::Utc;
use image::{DynamicImage, GrayImage, RgbImage};
use scanprep_core::error::{Result, ScanprepError};
use scanprep_core::{
    ArtifactKind, BinarizationMethod, ImageId, PipelineReport, PipelineStage, PreprocessingOptions,
    PreprocessingResult, QualityScore, ScanprepConfig,
};
use tracing::{debug, error, info, instrument, warn};

use crate::image::buffer::{ImageSource, PixelBuffer, decode};
use crate::scan::binarize::Binarizer;
use crate::scan::contrast::ContrastEnhancer;
use crate::scan::deskew::Deskewer;
use crate::scan::noise::{NoiseAssessment, NoiseReducer};
use crate::scan::quality;
use crate::scan::sharpen::Sharpener;
use crate::store::artifacts::ArtifactStore;

/// Decision state shared by the steps of one run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineContext {
    /// Quality of the grayscale image before any correction.
    pub baseline: QualityScore,
    pub options: PreprocessingOptions,
}

/// What the corrections measured and did.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub baseline: QualityScore,
    pub final_score: QualityScore,
    pub skew_angle: Option<f64>,
    pub noise: Option<NoiseAssessment>,
    pub sharpened: bool,
    pub binarization: Option<BinarizationMethod>,
    pub stages: Vec<PipelineStage>,
}

/// In-memory results of one run, before anything is written.
#[derive(Debug, Clone)]
pub struct ProcessedImages {
    /// Grayscale result of every enabled correction.
    pub gray: GrayImage,
    /// Color variant after deskew and contrast only.
    pub color: RgbImage,
    pub binary: Option<GrayImage>,
    pub outcome: StepOutcome,
}

/// Runs the corrections and writes artifacts.
#[derive(Debug)]
pub struct PreprocessingPipeline {
    enabled: bool,
    deskewer: Deskewer,
    contrast: ContrastEnhancer,
    noise: NoiseReducer,
    sharpener: Sharpener,
    binarizer: Binarizer,
    store: ArtifactStore,
}

impl PreprocessingPipeline {
    pub fn new(config: &ScanprepConfig) -> Result<Self> {
        config.tuning.validate()?;
        let tuning = &config.tuning;
        Ok(Self {
            enabled: config.preprocess_enabled,
            deskewer: Deskewer::new(tuning),
            contrast: ContrastEnhancer::new(tuning),
            noise: NoiseReducer::new(tuning),
            sharpener: Sharpener::new(tuning),
            binarizer: Binarizer::new(tuning),
            store: ArtifactStore::new(&config.output_root, config.public_prefix.clone()),
        })
    }

    /// Replace the binarization strategies.
    pub fn with_binarizer(mut self, binarizer: Binarizer) -> Self {
        self.binarizer = binarizer;
        self
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Decode, correct, and store one image. Never panics on bad input:
    /// every unrecoverable problem becomes `PreprocessingResult::Failure`.
    #[instrument(skip_all, fields(id = %id))]
    pub fn preprocess(
        &self,
        source: &ImageSource,
        id: &ImageId,
        options: &PreprocessingOptions,
    ) -> PreprocessingResult {
        match self.try_preprocess(source, id, options) {
            Ok(result) => result,
            Err(err) => {
                error!(error = %err, "Preprocessing failed");
                PreprocessingResult::from(err)
            }
        }
    }

    fn try_preprocess(
        &self,
        source: &ImageSource,
        id: &ImageId,
        options: &PreprocessingOptions,
    ) -> Result<PreprocessingResult> {
        let started_at = Utc::now();
        let clock = Instant::now();

        let buffer = decode(source)?;
        let processed = self.process(&buffer, options);
        let (output_width, output_height) = processed.gray.dimensions();

        let mut artifacts = vec![
            (ArtifactKind::Gray, PixelBuffer::Gray(processed.gray)),
            (ArtifactKind::Color, PixelBuffer::Color(processed.color)),
        ];
        if let Some(binary) = processed.binary {
            artifacts.push((ArtifactKind::Binary, PixelBuffer::Gray(binary)));
        }
        let mut stored = self.store.write_all(id, &artifacts)?;

        let mut outcome = processed.outcome;
        outcome.stages.push(PipelineStage::Emitted);

        let (Some(gray), Some(color)) = (stored.take(ArtifactKind::Gray), stored.take(ArtifactKind::Color))
        else {
            return Err(ScanprepError::Storage(
                "store did not return the gray and color artifacts".into(),
            ));
        };
        let binary = stored.take(ArtifactKind::Binary);

        let report = PipelineReport {
            image_id: id.clone(),
            started_at,
            duration_ms: clock.elapsed().as_millis() as u64,
            input_width: buffer.width(),
            input_height: buffer.height(),
            input_channels: buffer.channel_count(),
            output_width,
            output_height,
            baseline_score: outcome.baseline,
            final_score: outcome.final_score,
            skew_angle: outcome.skew_angle,
            noise_level: outcome.noise.map(|n| n.level),
            noise_detected: outcome.noise.is_some_and(|n| n.detected),
            sharpened: outcome.sharpened,
            binarization: outcome.binarization,
            stages: outcome.stages,
        };
        info!(
            duration_ms = report.duration_ms,
            artifacts = if binary.is_some() { 3 } else { 2 },
            "Preprocessing complete"
        );

        let local_path = color.local_path.clone();
        Ok(PreprocessingResult::Success {
            gray,
            color,
            binary,
            local_path,
            report,
        })
    }

    /// Run the enabled corrections on a decoded buffer. Pure: touches no
    /// files and never fails.
    #[instrument(skip_all, fields(width = buffer.width(), height = buffer.height(), channels = buffer.channel_count()))]
    pub fn process(&self, buffer: &PixelBuffer, options: &PreprocessingOptions) -> ProcessedImages {
        let mut gray = buffer.to_gray();
        let context = PipelineContext {
            baseline: quality::score(&gray),
            options: *options,
        };
        debug!(baseline = context.baseline.value(), "Baseline quality recorded");

        let mut outcome = StepOutcome {
            baseline: context.baseline,
            final_score: context.baseline,
            skew_angle: None,
            noise: None,
            sharpened: false,
            binarization: None,
            stages: vec![PipelineStage::Loaded],
        };
        let mut color = match buffer {
            PixelBuffer::Color(rgb) => Some(rgb.clone()),
            PixelBuffer::Gray(_) => None,
        };

        if !self.enabled {
            info!("Preprocessing disabled; emitting decoded image");
        }
        let corrections = if self.enabled {
            context.options
        } else {
            PreprocessingOptions {
                binarize: context.options.binarize,
                ..PreprocessingOptions::none()
            }
        };

        if corrections.auto_deskew {
            if let Some(angle) = self.deskewer.correction_angle(&gray) {
                if let Some((rotated_gray, rotated_color)) = self.rotate_both(&gray, color.as_ref(), angle) {
                    info!(angle, "Deskew applied");
                    gray = rotated_gray;
                    color = rotated_color;
                    outcome.skew_angle = Some(angle);
                    outcome.stages.push(PipelineStage::Deskewed);
                }
            }
        }

        if corrections.enhance_contrast {
            match self.contrast.try_enhance(&gray) {
                Ok(enhanced) => {
                    gray = enhanced;
                    color = color.map(|rgb| self.contrast.enhance_color(rgb));
                    outcome.stages.push(PipelineStage::ContrastEnhanced);
                }
                Err(err) => warn!(error = %err, "Contrast enhancement skipped"),
            }
        }

        // The color artifact stops here; gray inputs get their own snapshot.
        let color = color.unwrap_or_else(|| DynamicImage::ImageLuma8(gray.clone()).to_rgb8());

        if corrections.reduce_noise {
            let (denoised, assessment) = self.noise.reduce_if_noisy(gray);
            gray = denoised;
            outcome.noise = Some(assessment);
            if assessment.detected {
                outcome.stages.push(PipelineStage::Denoised);
            }
        }

        if corrections.sharpen {
            let (sharpened, applied) = self.sharpener.sharpen_if_degraded(gray, &context);
            gray = sharpened;
            outcome.sharpened = applied;
            if applied {
                outcome.stages.push(PipelineStage::Sharpened);
            }
        }

        outcome.final_score = quality::score(&gray);

        let binary = if corrections.binarize {
            let result = self.binarizer.binarize(&gray);
            outcome.binarization = Some(result.method);
            outcome.stages.push(PipelineStage::Binarized);
            Some(result.image)
        } else {
            None
        };

        debug!(stages = ?outcome.stages, final_score = outcome.final_score.value(), "Corrections finished");
        ProcessedImages {
            gray,
            color,
            binary,
            outcome,
        }
    }

    /// Rotate the gray buffer and, when present, the color buffer by the
    /// same angle. `None` unless every rotation succeeded, so the variants
    /// always share one geometry.
    fn rotate_both(
        &self,
        gray: &GrayImage,
        color: Option<&RgbImage>,
        angle: f64,
    ) -> Option<(GrayImage, Option<RgbImage>)> {
        let rotated_gray = self
            .deskewer
            .try_rotate_gray(gray, angle)
            .map_err(|err| warn!(error = %err, "Deskew rotation failed; keeping input"))
            .ok()?;
        let rotated_color = match color {
            Some(rgb) => Some(
                self.deskewer
                    .try_rotate_color(rgb, angle)
                    .map_err(|err| warn!(error = %err, "Color deskew rotation failed; keeping input"))
                    .ok()?,
            ),
            None => None,
        };
        Some((rotated_gray, rotated_color))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::binarize::ThresholdStrategy;
    use crate::store::integrity::verify_file;
    use image::{ImageFormat, Luma, Rgb};
    use scanprep_core::ArtifactPaths;
    use std::path::Path;
    use std::sync::Arc;

    fn config_in(root: &Path) -> ScanprepConfig {
        ScanprepConfig {
            output_root: root.join("preprocessed"),
            id_counter_path: root.join("image_id.txt"),
            ..ScanprepConfig::default()
        }
    }

    /// White page with dark text-line bars tilted clockwise by `degrees`
    /// about the page centre.
    fn tilted_page(width: u32, height: u32, degrees: f64) -> GrayImage {
        let (sin, cos) = degrees.to_radians().sin_cos();
        let (cx, cy) = (width as f64 / 2.0, height as f64 / 2.0);
        GrayImage::from_fn(width, height, |x, y| {
            let (dx, dy) = (x as f64 - cx, y as f64 - cy);
            // Undo the tilt to find the point on the upright page.
            let u = dx * cos + dy * sin;
            let v = -dx * sin + dy * cos;
            let in_block = u.abs() < width as f64 * 0.35 && v.abs() < height as f64 * 0.25;
            let on_line = (v + height as f64).rem_euclid(16.0) < 5.0;
            Luma([if in_block && on_line { 25 } else { 245 }])
        })
    }

    fn png_source(image: DynamicImage) -> ImageSource {
        let mut data = Vec::new();
        image
            .write_to(&mut std::io::Cursor::new(&mut data), ImageFormat::Png)
            .expect("encode");
        ImageSource::bytes(data)
    }

    fn success_parts(result: &PreprocessingResult) -> (&ArtifactPaths, &ArtifactPaths, Option<&ArtifactPaths>, &PipelineReport) {
        match result {
            PreprocessingResult::Success {
                gray,
                color,
                binary,
                report,
                ..
            } => (gray, color, binary.as_ref(), report),
            PreprocessingResult::Failure { message } => panic!("pipeline failed: {message}"),
        }
    }

    fn decoded_dimensions(path: &Path) -> (u32, u32) {
        let img = image::open(path).expect("artifact decodes");
        (img.width(), img.height())
    }

    #[test]
    fn default_run_emits_three_artifacts_at_input_size() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pipeline = PreprocessingPipeline::new(&config_in(dir.path())).expect("pipeline");
        let source = png_source(DynamicImage::ImageLuma8(tilted_page(1000, 800, 10.0)));
        let id = ImageId::new("1").expect("id");

        let result = pipeline.preprocess(&source, &id, &PreprocessingOptions::default());
        let (gray, color, binary, report) = success_parts(&result);
        let binary = binary.expect("binarize is on by default");

        for artifact in [gray, color, binary] {
            assert!(artifact.local_path.exists());
            verify_file(&artifact.local_path, &artifact.sha256).expect("digest");
            assert_eq!(decoded_dimensions(&artifact.local_path), (1000, 800));
        }
        assert_eq!(result.local_path(), Some(color.local_path.as_path()));
        assert_eq!(color.public_path, "/static/preprocessed/1/preprocessed.png");
        assert_eq!(
            std::fs::read_dir(pipeline.store().image_dir(&id)).expect("dir").count(),
            3
        );

        assert_eq!(report.skew_angle, None);
        assert_eq!(
            report.stages,
            [
                PipelineStage::Loaded,
                PipelineStage::ContrastEnhanced,
                PipelineStage::Binarized,
                PipelineStage::Emitted,
            ]
        );
        assert_eq!(report.input_channels, 1);
    }

    #[test]
    fn deskew_expands_every_artifact_alike() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pipeline = PreprocessingPipeline::new(&config_in(dir.path())).expect("pipeline");
        let page = tilted_page(400, 320, 10.0);
        let rgb = DynamicImage::ImageLuma8(page).to_rgb8();
        let options = PreprocessingOptions {
            auto_deskew: true,
            ..PreprocessingOptions::default()
        };

        let id = ImageId::new("tilted").expect("id");
        let result = pipeline.preprocess(&png_source(DynamicImage::ImageRgb8(rgb)), &id, &options);
        let (gray, color, binary, report) = success_parts(&result);

        let angle = report.skew_angle.expect("deskew applied");
        assert!((angle - 10.0).abs() < 1.0, "angle {angle}");
        let dims = decoded_dimensions(&gray.local_path);
        assert_ne!(dims, (400, 320));
        assert_eq!(decoded_dimensions(&color.local_path), dims);
        assert_eq!(decoded_dimensions(&binary.expect("binary").local_path), dims);
        assert_eq!(report.stages[1], PipelineStage::Deskewed);
    }

    #[test]
    fn binary_artifact_is_absent_when_disabled() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pipeline = PreprocessingPipeline::new(&config_in(dir.path())).expect("pipeline");
        let options = PreprocessingOptions {
            binarize: false,
            ..PreprocessingOptions::default()
        };
        let source = png_source(DynamicImage::ImageLuma8(tilted_page(200, 160, 0.0)));
        let result = pipeline.preprocess(&source, &ImageId::new("nb").expect("id"), &options);
        let (_, _, binary, report) = success_parts(&result);
        assert!(binary.is_none());
        assert_eq!(report.binarization, None);
    }

    #[test]
    fn decode_failure_is_reported_without_writing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pipeline = PreprocessingPipeline::new(&config_in(dir.path())).expect("pipeline");
        let id = ImageId::new("broken").expect("id");

        let result = pipeline.preprocess(
            &ImageSource::bytes(b"\x89PNG but truncated".to_vec()),
            &id,
            &PreprocessingOptions::default(),
        );
        match result {
            PreprocessingResult::Failure { message } => assert!(message.contains("decode")),
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(!pipeline.store().image_dir(&id).exists());
    }

    #[test]
    fn storage_failure_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blocker = dir.path().join("preprocessed");
        std::fs::write(&blocker, b"not a directory").expect("write");
        let pipeline = PreprocessingPipeline::new(&config_in(dir.path())).expect("pipeline");

        let source = png_source(DynamicImage::ImageLuma8(tilted_page(64, 64, 0.0)));
        let result = pipeline.preprocess(&source, &ImageId::new("x").expect("id"), &PreprocessingOptions::default());
        assert!(!result.is_success());
    }

    #[test]
    fn color_variant_skips_denoise_and_sharpen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pipeline = PreprocessingPipeline::new(&config_in(dir.path())).expect("pipeline");
        // Alternating pixels read as heavy noise.
        let noisy = GrayImage::from_fn(48, 48, |x, y| Luma([if (x + y) % 2 == 0 { 90 } else { 170 }]));
        let buffer = PixelBuffer::Gray(noisy);
        let options = PreprocessingOptions {
            enhance_contrast: false,
            reduce_noise: true,
            ..PreprocessingOptions::none()
        };

        let processed = pipeline.process(&buffer, &options);
        let assessment = processed.outcome.noise.expect("noise measured");
        assert!(assessment.detected);
        assert_ne!(processed.gray, buffer.to_gray());
        assert_eq!(processed.color, buffer.to_color());
        assert!(processed.outcome.stages.contains(&PipelineStage::Denoised));
    }

    #[test]
    fn color_input_keeps_its_hue() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pipeline = PreprocessingPipeline::new(&config_in(dir.path())).expect("pipeline");
        let rgb = RgbImage::from_fn(64, 64, |x, _| Rgb([150 + (x % 40) as u8, 40, 40]));

        let processed = pipeline.process(&PixelBuffer::Color(rgb), &PreprocessingOptions::default());
        assert!(processed.color.pixels().all(|p| p.0[0] > p.0[1]));
        assert!(processed.binary.is_some());
    }

    #[test]
    fn disabled_preprocessing_emits_decoded_image() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = ScanprepConfig {
            preprocess_enabled: false,
            ..config_in(dir.path())
        };
        let pipeline = PreprocessingPipeline::new(&config).expect("pipeline");
        let page = tilted_page(120, 90, 12.0);

        let processed = pipeline.process(&PixelBuffer::Gray(page.clone()), &PreprocessingOptions::all());
        assert_eq!(processed.gray, page);
        assert!(processed.binary.is_some());
        assert_eq!(
            processed.outcome.stages,
            [PipelineStage::Loaded, PipelineStage::Binarized]
        );
    }

    #[test]
    fn failing_binarizer_still_emits_binary_artifact() {
        struct Broken;
        impl ThresholdStrategy for Broken {
            fn method(&self) -> BinarizationMethod {
                BinarizationMethod::Otsu
            }
            fn apply(&self, _gray: &GrayImage) -> Result<GrayImage> {
                Err(ScanprepError::Binarize("mocked".into()))
            }
        }

        let dir = tempfile::tempdir().expect("tempdir");
        let pipeline = PreprocessingPipeline::new(&config_in(dir.path()))
            .expect("pipeline")
            .with_binarizer(Binarizer::with_strategies(vec![Box::new(Broken)], 127));
        let source = png_source(DynamicImage::ImageLuma8(tilted_page(80, 60, 0.0)));

        let result = pipeline.preprocess(&source, &ImageId::new("fb").expect("id"), &PreprocessingOptions::default());
        let (_, _, binary, report) = success_parts(&result);
        assert!(binary.is_some());
        assert_eq!(report.binarization, Some(BinarizationMethod::Fixed));
    }

    #[test]
    fn pipeline_is_stable_on_its_own_deskewed_output() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pipeline = PreprocessingPipeline::new(&config_in(dir.path())).expect("pipeline");
        let options = PreprocessingOptions {
            auto_deskew: true,
            enhance_contrast: false,
            ..PreprocessingOptions::none()
        };

        let first = pipeline.process(&PixelBuffer::Gray(tilted_page(300, 240, 8.0)), &options);
        assert!(first.outcome.skew_angle.is_some());
        let second = pipeline.process(&PixelBuffer::Gray(first.gray.clone()), &options);
        assert_eq!(second.outcome.skew_angle, None);
        assert_eq!(second.gray, first.gray);
    }

    #[test]
    fn concurrent_runs_keep_their_own_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pipeline = Arc::new(PreprocessingPipeline::new(&config_in(dir.path())).expect("pipeline"));

        let handles: Vec<_> = (0..4u8)
            .map(|i| {
                let pipeline = Arc::clone(&pipeline);
                std::thread::spawn(move || {
                    let shade = 60 + i * 40;
                    let img = GrayImage::from_fn(96, 72, |x, _| Luma([if x < 48 { shade } else { 250 }]));
                    let id = ImageId::new(format!("job-{i}")).expect("id");
                    let result = pipeline.preprocess(
                        &png_source(DynamicImage::ImageLuma8(img)),
                        &id,
                        &PreprocessingOptions::none(),
                    );
                    (id, shade, result)
                })
            })
            .collect();

        for handle in handles {
            let (id, shade, result) = handle.join().expect("thread");
            let (gray, color, binary, _) = success_parts(&result);
            assert!(binary.is_none());
            let expected_dir = pipeline.store().image_dir(&id);
            assert_eq!(gray.local_path.parent(), Some(expected_dir.as_path()));
            assert_eq!(color.local_path.parent(), Some(expected_dir.as_path()));

            let stored = image::open(&gray.local_path).expect("decode").to_luma8();
            assert_eq!(stored.get_pixel(0, 0).0[0], shade);
        }
    }
}
