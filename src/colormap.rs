//! Color-map lookup tables.
//!
//! Four 256-entry RGB tables (Viridis, Inferno, Magma, Plasma), evaluated
//! once at context creation from the published degree-six polynomial fits of
//! the matplotlib maps and uploaded as storage buffers. The color-map pass
//! indexes a table by `min(floor(error * 256), 255)`; Magma is the default
//! for written output.

/// Entries per table.
pub const TABLE_SIZE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorMap {
    Viridis,
    Inferno,
    Magma,
    Plasma,
}

impl ColorMap {
    pub const ALL: [ColorMap; 4] = [
        ColorMap::Viridis,
        ColorMap::Inferno,
        ColorMap::Magma,
        ColorMap::Plasma,
    ];
}

type Coefficients = [[f32; 3]; 7];

const VIRIDIS: Coefficients = [
    [0.277_727_3, 0.005_407_344_4, 0.334_099_8],
    [0.105_093_04, 1.404_613_5, 1.384_590_2],
    [-0.330_861_83, 0.214_847_56, 0.095_095_16],
    [-4.634_230_5, -5.799_101, -19.332_441],
    [6.228_27, 14.179_933, 56.690_55],
    [4.776_385, -13.745_145, -65.353_035],
    [-5.435_456, 4.645_852_6, 26.312_435],
];

const INFERNO: Coefficients = [
    [0.000_218_940_37, 0.001_651_004_6, -0.019_480_898],
    [0.106_513_42, 0.563_956_44, 3.932_712_4],
    [11.602_493, -3.972_854, -15.942_394],
    [-41.703_996, 17.436_399, 44.354_145],
    [77.162_935, -33.402_359, -81.807_309],
    [-71.319_428, 32.626_064, 73.209_52],
    [25.131_126, -12.242_669, -23.070_325],
];

const MAGMA: Coefficients = [
    [-0.002_136_485, -0.000_749_655_05, -0.005_386_127_8],
    [0.251_660_54, 0.677_523_24, 2.494_026_6],
    [8.353_717, -3.577_719_5, 0.314_467_9],
    [-27.668_733, 14.264_731, -13.649_213],
    [52.176_14, -27.943_606, 12.944_169],
    [-50.768_525, 29.046_583, 4.234_153],
    [18.655_705, -11.489_774, -5.601_961_5],
];

const PLASMA: Coefficients = [
    [0.058_732_344, 0.023_336_709, 0.543_340_2],
    [2.176_514_6, 0.238_383_42, 0.753_960_46],
    [-2.689_460_5, -7.455_851, 3.110_8],
    [6.130_348_3, 42.346_188, -28.518_855],
    [-11.107_436, -82.666_311, 60.139_848],
    [10.023_066, 71.413_618, -54.072_187],
    [-3.658_713_8, -22.931_535, 18.191_908],
];

fn coefficients(map: ColorMap) -> &'static Coefficients {
    match map {
        ColorMap::Viridis => &VIRIDIS,
        ColorMap::Inferno => &INFERNO,
        ColorMap::Magma => &MAGMA,
        ColorMap::Plasma => &PLASMA,
    }
}

fn sample(coefficients: &Coefficients, t: f32) -> [f32; 3] {
    let mut value = [0.0f32; 3];
    for channel in 0..3 {
        // Horner evaluation of the degree-6 fit.
        let mut v = coefficients[6][channel];
        for degree in (0..6).rev() {
            v = v * t + coefficients[degree][channel];
        }
        value[channel] = v.clamp(0.0, 1.0);
    }
    value
}

/// Evaluates one table as 256 packed RGB float triples.
pub fn table(map: ColorMap) -> Vec<f32> {
    let coefficients = coefficients(map);
    let mut values = Vec::with_capacity(TABLE_SIZE * 3);
    for entry in 0..TABLE_SIZE {
        let t = entry as f32 / (TABLE_SIZE - 1) as f32;
        values.extend_from_slice(&sample(coefficients, t));
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;

    fn luma(rgb: &[f32]) -> f32 {
        0.2126 * rgb[0] + 0.7152 * rgb[1] + 0.0722 * rgb[2]
    }

    #[test]
    fn tables_hold_256_rgb_triples_in_range() {
        for map in ColorMap::ALL {
            let values = table(map);
            assert_eq!(values.len(), TABLE_SIZE * 3);
            assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));
        }
    }

    #[test]
    fn tables_run_dark_to_bright() {
        for map in ColorMap::ALL {
            let values = table(map);
            let first = luma(&values[0..3]);
            let last = luma(&values[values.len() - 3..]);
            assert!(
                last > first + 0.5,
                "{map:?} should brighten substantially across its range"
            );
        }
    }

    #[test]
    fn magma_starts_near_black() {
        let values = table(ColorMap::Magma);
        assert!(luma(&values[0..3]) < 0.05);
    }

    #[test]
    fn maps_are_distinct() {
        let midpoints: Vec<[f32; 3]> = ColorMap::ALL
            .iter()
            .map(|&map| {
                let values = table(map);
                [values[128 * 3], values[128 * 3 + 1], values[128 * 3 + 2]]
            })
            .collect();
        for i in 0..midpoints.len() {
            for j in i + 1..midpoints.len() {
                let delta: f32 = midpoints[i]
                    .iter()
                    .zip(&midpoints[j])
                    .map(|(a, b)| (a - b).abs())
                    .sum();
                assert!(delta > 0.05, "maps {i} and {j} are too similar");
            }
        }
    }
}
