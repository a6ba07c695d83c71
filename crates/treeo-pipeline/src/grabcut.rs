//! Iterative graph-cut foreground segmentation (GrabCut).
//!
//! Starting from a per-pixel [`LabelMap`] where some pixels are fixed
//! foreground/background and the rest are "probable", each iteration:
//!
//! 1. assigns every pixel to the most likely component of its class's
//!    color model,
//! 2. relearns both [`Gmm`]s from those assignments,
//! 3. builds a graph whose terminal weights are the negative log
//!    likelihoods under each model and whose neighbour weights penalize
//!    cutting between similar colors,
//! 4. relabels the probable pixels from the minimum cut.
//!
//! Fixed labels never change. Neighbourhoods are 8-connected (each
//! pixel links to its left, up-left, up and up-right neighbours).

use image::{GrayImage, Luma};

use crate::gmm::{Color, Gmm};
use crate::maxflow::FlowGraph;
use crate::types::RgbImage;

/// Per-pixel segmentation label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GrabLabel {
    /// Fixed background.
    Background,
    /// Fixed foreground.
    Foreground,
    /// Background unless the cut decides otherwise.
    ProbableBackground,
    /// Foreground unless the cut decides otherwise.
    ProbableForeground,
}

impl GrabLabel {
    /// Fixed or probable foreground.
    #[must_use]
    pub const fn is_foreground(self) -> bool {
        matches!(self, Self::Foreground | Self::ProbableForeground)
    }

    /// Not changed by segmentation.
    #[must_use]
    pub const fn is_fixed(self) -> bool {
        matches!(self, Self::Foreground | Self::Background)
    }

    /// Gray level used when visualizing a label map.
    #[must_use]
    pub const fn to_luma(self) -> u8 {
        match self {
            Self::Background => 0,
            Self::ProbableBackground => 64,
            Self::ProbableForeground => 192,
            Self::Foreground => 255,
        }
    }
}

/// A grid of [`GrabLabel`]s matching an image's dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMap {
    width: u32,
    height: u32,
    labels: Vec<GrabLabel>,
}

impl LabelMap {
    /// A map with every pixel set to `fill`.
    #[must_use]
    pub fn new(width: u32, height: u32, fill: GrabLabel) -> Self {
        Self {
            width,
            height,
            labels: vec![fill; width as usize * height as usize],
        }
    }

    /// Map width.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Map height.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    const fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    /// Label at `(x, y)`, or `None` out of bounds.
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> Option<GrabLabel> {
        (x < self.width && y < self.height).then(|| self.labels[self.index(x, y)])
    }

    /// Set the label at `(x, y)`; out-of-bounds writes are ignored.
    pub fn set(&mut self, x: u32, y: u32, label: GrabLabel) {
        if x < self.width && y < self.height {
            let i = self.index(x, y);
            self.labels[i] = label;
        }
    }

    /// Set every pixel in columns `x_start..x_end` (clamped to the map).
    pub fn fill_columns(&mut self, x_start: u32, x_end: u32, label: GrabLabel) {
        let x_end = x_end.min(self.width);
        for y in 0..self.height {
            for x in x_start..x_end {
                self.set(x, y, label);
            }
        }
    }

    /// Set `label` wherever `mask` is non-zero.
    pub fn apply_mask(&mut self, mask: &GrayImage, label: GrabLabel) {
        for (x, y, pixel) in mask.enumerate_pixels() {
            if pixel.0[0] > 0 {
                self.set(x, y, label);
            }
        }
    }

    /// Number of pixels carrying a foreground label.
    #[must_use]
    pub fn foreground_count(&self) -> usize {
        self.labels.iter().filter(|l| l.is_foreground()).count()
    }

    /// Binary mask: 255 for (probable) foreground, 0 otherwise.
    #[must_use]
    pub fn foreground_mask(&self) -> GrayImage {
        GrayImage::from_fn(self.width, self.height, |x, y| {
            Luma([if self.labels[self.index(x, y)].is_foreground() {
                255
            } else {
                0
            }])
        })
    }

    /// Visualization with one gray level per label (see [`GrabLabel::to_luma`]).
    #[must_use]
    pub fn to_image(&self) -> GrayImage {
        GrayImage::from_fn(self.width, self.height, |x, y| {
            Luma([self.labels[self.index(x, y)].to_luma()])
        })
    }
}

/// Errors that prevent segmentation from running.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GrabCutError {
    /// Image and label map dimensions differ.
    #[error("label map is {labels:?} but image is {image:?}")]
    SizeMismatch {
        /// Image `(width, height)`.
        image: (u32, u32),
        /// Label map `(width, height)`.
        labels: (u32, u32),
    },

    /// No pixel is labeled (probable) background.
    #[error("no background samples to model")]
    NoBackgroundSamples,

    /// No pixel is labeled (probable) foreground.
    #[error("no foreground samples to model")]
    NoForegroundSamples,
}

/// GrabCut parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GrabCut {
    /// Number of model/cut iterations.
    pub iterations: u32,
    /// Components per color model.
    pub components: usize,
    /// Neighbour smoothness weight.
    pub gamma: f64,
    /// Seed for the k-means initialisation.
    pub seed: u64,
}

impl GrabCut {
    /// Default component count per model.
    pub const DEFAULT_COMPONENTS: usize = 5;
    /// Default smoothness weight.
    pub const DEFAULT_GAMMA: f64 = 50.0;

    /// Parameters with `iterations` and defaults for the rest.
    #[must_use]
    pub const fn with_iterations(iterations: u32) -> Self {
        Self {
            iterations,
            components: Self::DEFAULT_COMPONENTS,
            gamma: Self::DEFAULT_GAMMA,
            seed: 0,
        }
    }

    /// Weight of fixed labels; large enough that no cut crosses them.
    const fn lambda(&self) -> f64 {
        9.0 * self.gamma
    }

    /// Segment `image`, refining the probable labels in `labels` in place.
    ///
    /// # Errors
    ///
    /// Returns [`GrabCutError::SizeMismatch`] when dimensions differ and
    /// [`GrabCutError::NoBackgroundSamples`] /
    /// [`GrabCutError::NoForegroundSamples`] when a class has no pixels
    /// to learn a color model from.
    pub fn run(&self, image: &RgbImage, labels: &mut LabelMap) -> Result<(), GrabCutError> {
        if image.dimensions() != (labels.width, labels.height) {
            return Err(GrabCutError::SizeMismatch {
                image: image.dimensions(),
                labels: (labels.width, labels.height),
            });
        }

        let colors: Vec<Color> = image
            .pixels()
            .map(|p| Color::new(f64::from(p.0[0]), f64::from(p.0[1]), f64::from(p.0[2])))
            .collect();

        let (fg_samples, bg_samples) = split_by_class(&colors, &labels.labels);
        if bg_samples.is_empty() {
            return Err(GrabCutError::NoBackgroundSamples);
        }
        if fg_samples.is_empty() {
            return Err(GrabCutError::NoForegroundSamples);
        }
        let mut fg_model = Gmm::fit(&fg_samples, self.components, self.seed);
        let mut bg_model = Gmm::fit(&bg_samples, self.components, self.seed.wrapping_add(1));

        let neighbours = NeighbourWeights::new(image, self.gamma);

        for iteration in 0..self.iterations {
            let (fg, bg) = self.relearn(&colors, &labels.labels, &fg_model, &bg_model);
            fg_model = fg;
            bg_model = bg;

            let mut graph =
                self.build_graph(&colors, &labels.labels, &fg_model, &bg_model, &neighbours);
            let flow = graph.max_flow();
            let source_side = graph.source_side();

            for (label, &foreground) in labels.labels.iter_mut().zip(&source_side) {
                if !label.is_fixed() {
                    *label = if foreground {
                        GrabLabel::ProbableForeground
                    } else {
                        GrabLabel::ProbableBackground
                    };
                }
            }
            log::debug!(
                "grabcut iteration {}: flow {flow:.1}, {} foreground pixels",
                iteration + 1,
                labels.foreground_count(),
            );
        }
        Ok(())
    }

    /// Assign components and relearn both models.
    fn relearn(
        &self,
        colors: &[Color],
        labels: &[GrabLabel],
        fg_model: &Gmm,
        bg_model: &Gmm,
    ) -> (Gmm, Gmm) {
        let mut fg = (Vec::new(), Vec::new());
        let mut bg = (Vec::new(), Vec::new());
        for (color, label) in colors.iter().zip(labels) {
            if label.is_foreground() {
                fg.0.push(*color);
                fg.1.push(fg_model.most_likely_component(color));
            } else {
                bg.0.push(*color);
                bg.1.push(bg_model.most_likely_component(color));
            }
        }
        (
            Gmm::learn(&fg.0, &fg.1, self.components),
            Gmm::learn(&bg.0, &bg.1, self.components),
        )
    }

    fn build_graph(
        &self,
        colors: &[Color],
        labels: &[GrabLabel],
        fg_model: &Gmm,
        bg_model: &Gmm,
        neighbours: &NeighbourWeights,
    ) -> FlowGraph {
        let lambda = self.lambda();
        let (w, h) = (neighbours.width, neighbours.height);
        let mut graph = FlowGraph::with_capacity(w * h, 4 * w * h);

        for y in 0..h {
            for x in 0..w {
                let i = y * w + x;
                let (source, sink) = match labels[i] {
                    GrabLabel::Background => (0.0, lambda),
                    GrabLabel::Foreground => (lambda, 0.0),
                    GrabLabel::ProbableBackground | GrabLabel::ProbableForeground => (
                        negative_log(bg_model.probability(&colors[i])),
                        negative_log(fg_model.probability(&colors[i])),
                    ),
                };
                graph.add_terminal_weights(i, source, sink);

                if x > 0 {
                    let weight = neighbours.left[i];
                    graph.add_edge(i, i - 1, weight, weight);
                }
                if x > 0 && y > 0 {
                    let weight = neighbours.up_left[i];
                    graph.add_edge(i, i - w - 1, weight, weight);
                }
                if y > 0 {
                    let weight = neighbours.up[i];
                    graph.add_edge(i, i - w, weight, weight);
                }
                if x + 1 < w && y > 0 {
                    let weight = neighbours.up_right[i];
                    graph.add_edge(i, i - w + 1, weight, weight);
                }
            }
        }
        graph
    }
}

impl Default for GrabCut {
    fn default() -> Self {
        Self::with_iterations(5)
    }
}

/// `-ln(p)`, finite even for zero densities.
fn negative_log(p: f64) -> f64 {
    -p.max(f64::MIN_POSITIVE).ln()
}

fn split_by_class(colors: &[Color], labels: &[GrabLabel]) -> (Vec<Color>, Vec<Color>) {
    let mut fg = Vec::new();
    let mut bg = Vec::new();
    for (color, label) in colors.iter().zip(labels) {
        if label.is_foreground() {
            fg.push(*color);
        } else {
            bg.push(*color);
        }
    }
    (fg, bg)
}

/// Smoothness weights from each pixel to its already-visited neighbours.
struct NeighbourWeights {
    width: usize,
    height: usize,
    left: Vec<f64>,
    up_left: Vec<f64>,
    up: Vec<f64>,
    up_right: Vec<f64>,
}

impl NeighbourWeights {
    /// `gamma / distance · exp(-beta · ‖Δcolor‖²)` with
    /// `beta = 1 / (2 · mean ‖Δcolor‖²)` over all neighbour pairs.
    fn new(image: &RgbImage, gamma: f64) -> Self {
        let (w, h) = (image.width() as usize, image.height() as usize);
        let color = |x: usize, y: usize| {
            #[allow(clippy::cast_possible_truncation)]
            let p = image.get_pixel(x as u32, y as u32).0;
            Color::new(f64::from(p[0]), f64::from(p[1]), f64::from(p[2]))
        };
        let diff = |a: (usize, usize), b: (usize, usize)| {
            (color(a.0, a.1) - color(b.0, b.1)).norm_squared()
        };

        let mut sum = 0.0;
        let mut pairs = 0usize;
        for y in 0..h {
            for x in 0..w {
                if x > 0 {
                    sum += diff((x, y), (x - 1, y));
                    pairs += 1;
                }
                if x > 0 && y > 0 {
                    sum += diff((x, y), (x - 1, y - 1));
                    pairs += 1;
                }
                if y > 0 {
                    sum += diff((x, y), (x, y - 1));
                    pairs += 1;
                }
                if x + 1 < w && y > 0 {
                    sum += diff((x, y), (x + 1, y - 1));
                    pairs += 1;
                }
            }
        }
        #[allow(clippy::cast_precision_loss)]
        let beta = if sum <= f64::EPSILON || pairs == 0 {
            0.0
        } else {
            1.0 / (2.0 * sum / pairs as f64)
        };
        let diagonal_gamma = gamma / std::f64::consts::SQRT_2;

        let mut weights = Self {
            width: w,
            height: h,
            left: vec![0.0; w * h],
            up_left: vec![0.0; w * h],
            up: vec![0.0; w * h],
            up_right: vec![0.0; w * h],
        };
        for y in 0..h {
            for x in 0..w {
                let i = y * w + x;
                if x > 0 {
                    weights.left[i] = gamma * (-beta * diff((x, y), (x - 1, y))).exp();
                }
                if x > 0 && y > 0 {
                    weights.up_left[i] =
                        diagonal_gamma * (-beta * diff((x, y), (x - 1, y - 1))).exp();
                }
                if y > 0 {
                    weights.up[i] = gamma * (-beta * diff((x, y), (x, y - 1))).exp();
                }
                if x + 1 < w && y > 0 {
                    weights.up_right[i] =
                        diagonal_gamma * (-beta * diff((x, y), (x + 1, y - 1))).exp();
                }
            }
        }
        weights
    }
}
