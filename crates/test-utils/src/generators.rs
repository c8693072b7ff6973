//! Test data generators for creating synthetic weather-like fields.
//!
//! All grids are `Vec<f32>` in row-major order (row 0 first).

/// Creates a test grid where each cell is `col * 1000 + row`.
///
/// Makes it easy to check that a value was read from the intended cell.
///
/// ```
/// use test_utils::create_test_grid;
///
/// let grid = create_test_grid(10, 5);
/// assert_eq!(grid[1], 1000.0);  // col=1, row=0
/// assert_eq!(grid[10], 1.0);    // col=0, row=1
/// ```
pub fn create_test_grid(width: usize, height: usize) -> Vec<f32> {
    let mut data = Vec::with_capacity(width * height);
    for row in 0..height {
        for col in 0..width {
            data.push((col * 1000 + row) as f32);
        }
    }
    data
}

/// Temperatures in Kelvin on a 250K to 310K gradient, rounded to 0.01 K.
pub fn create_temperature_grid(width: usize, height: usize) -> Vec<f32> {
    let mut data = Vec::with_capacity(width * height);
    for row in 0..height {
        for col in 0..width {
            let x_factor = col as f32 / width.max(1) as f32;
            let y_factor = row as f32 / height.max(1) as f32;
            let temp = 250.0 + (x_factor * 30.0) + (y_factor * 30.0);
            data.push((temp * 100.0).round() / 100.0);
        }
    }
    data
}

/// U wind component in m/s, signed, varying by row.
pub fn create_u_wind_grid(width: usize, height: usize) -> Vec<f32> {
    let mut data = Vec::with_capacity(width * height);
    for row in 0..height {
        let lat_factor = (row as f32 / height.max(1) as f32 - 0.5) * 2.0;
        let u = (lat_factor * 20.0 * 10.0).round() / 10.0;
        data.extend(std::iter::repeat(u).take(width));
    }
    data
}

/// Creates a grid filled with a constant value.
pub fn create_constant_grid(width: usize, height: usize, value: f32) -> Vec<f32> {
    vec![value; width * height]
}

/// Replaces the given (col, row) cells of a grid with `NaN`.
pub fn with_nans(mut data: Vec<f32>, width: usize, nan_positions: &[(usize, usize)]) -> Vec<f32> {
    for &(col, row) in nan_positions {
        let idx = row * width + col;
        if col < width && idx < data.len() {
            data[idx] = f32::NAN;
        }
    }
    data
}
