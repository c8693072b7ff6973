//! End-to-end decoding of synthetic GRIB2 files.

use std::io::Write;

use flate2::write::GzEncoder;
use flate2::Compression;
use grib2_parser::{Grib2Error, GridDecoder, VariableSelector};
use test_utils::{
    assert_approx_eq, concat_messages, create_temperature_grid, create_test_grid,
    create_u_wind_grid, temp_test_dir, with_nans, write_grib2_file, FieldBuilder, Grib2Builder,
    MissingEncoding, PackingMethod,
};

fn t2m() -> VariableSelector {
    VariableSelector::new("temperature_2m", "TMP").at_level(103, 2.0)
}

#[test]
fn test_simple_packing_lat_lon() {
    let values = create_test_grid(4, 3);
    let message = Grib2Builder::lat_lon(4, 3, 45.0, 250.0, 0.5, 0.25)
        .with_field(FieldBuilder::temperature_2m(values.clone()).with_decimal_scale(0))
        .build();

    let decoded = GridDecoder::new().decode_bytes(&message, &[t2m()]).unwrap();
    let grid = decoded.grid.as_ref().unwrap();
    assert_eq!(grid.shape(), (3, 4));

    let (lat, lon) = grid.lat_lon(2, 3);
    assert_approx_eq!(lat, 44.5, 1e-9);
    assert_approx_eq!(lon, -108.5, 1e-9);

    let field = decoded.field("temperature_2m").unwrap();
    assert_eq!(field.shape(), (3, 4));
    assert_eq!(field.short_name, "TMP");
    assert_eq!(field.value_at(0, 1), Some(1000.0));
    assert_eq!(field.value_at(2, 3), Some(3002.0));
    assert!(decoded.missing.is_empty());
}

#[test]
fn test_reference_time_and_forecast_hour() {
    let message = Grib2Builder::lat_lon(2, 2, 40.0, -100.0, 1.0, 1.0)
        .with_reference_time(2024, 7, 4, 18)
        .with_field(FieldBuilder::temperature_2m(vec![300.0; 4]).with_forecast_hour(6))
        .build();

    let decoded = GridDecoder::new().decode_bytes(&message, &[t2m()]).unwrap();
    assert_eq!(
        decoded.reference_time.unwrap().to_rfc3339(),
        "2024-07-04T18:00:00+00:00"
    );
    assert_eq!(decoded.fields[0].forecast_hours, Some(6.0));
    assert_eq!(decoded.fields[0].value_at(1, 1), Some(300.0));
}

#[test]
fn test_lambert_spatial_differencing() {
    let (ni, nj) = (7u32, 5u32);
    let temps = create_temperature_grid(ni as usize, nj as usize);
    let winds = create_u_wind_grid(ni as usize, nj as usize);

    let message = Grib2Builder::hrrr_lambert(ni, nj)
        .with_field(
            FieldBuilder::temperature_2m(temps.clone())
                .with_packing(PackingMethod::SpatialDifferencing(2)),
        )
        .with_field(
            FieldBuilder::new(2, 2, 103, 10, winds.clone())
                .with_decimal_scale(1)
                .with_packing(PackingMethod::SpatialDifferencing(1))
                .with_group_size(3),
        )
        .build();

    let selectors = [
        t2m(),
        VariableSelector::new("u_component_wind_10m", "UGRD").at_level(103, 10.0),
    ];
    let decoded = GridDecoder::new().decode_bytes(&message, &selectors).unwrap();

    let grid = decoded.grid.as_ref().unwrap();
    let (lat, lon) = grid.lat_lon(0, 0);
    assert_approx_eq!(lat, 21.138123, 1e-6);
    assert_approx_eq!(lon, -122.719528, 1e-6);

    // One row north is about 3 km further
    let (lat_n, _) = grid.lat_lon(1, 0);
    assert!(lat_n > lat);

    let temperature = decoded.field("temperature_2m").unwrap();
    let wind = decoded.field("u_component_wind_10m").unwrap();
    for row in 0..nj as usize {
        for col in 0..ni as usize {
            let idx = row * ni as usize + col;
            assert_approx_eq!(temperature.value_at(row, col).unwrap(), temps[idx], 1e-3);
            assert_approx_eq!(wind.value_at(row, col).unwrap(), winds[idx], 1e-4);
        }
    }
}

#[test]
fn test_complex_packing_without_differencing() {
    let values = create_test_grid(5, 4);
    let message = Grib2Builder::lat_lon(5, 4, 30.0, -90.0, 0.1, 0.1)
        .with_field(
            FieldBuilder::temperature_2m(values.clone())
                .with_decimal_scale(0)
                .with_packing(PackingMethod::Complex)
                .with_group_size(6),
        )
        .build();

    let decoded = GridDecoder::new().decode_bytes(&message, &[t2m()]).unwrap();
    assert_eq!(decoded.fields[0].values(), values.as_slice());
}

#[test]
fn test_bitmap_missing_cells() {
    let values = with_nans(create_test_grid(4, 4), 4, &[(1, 0), (3, 3)]);
    let message = Grib2Builder::lat_lon(4, 4, 40.0, -100.0, 1.0, 1.0)
        .with_field(
            FieldBuilder::temperature_2m(values)
                .with_decimal_scale(0)
                .with_packing(PackingMethod::SpatialDifferencing(2)),
        )
        .build();

    let decoded = GridDecoder::new().decode_bytes(&message, &[t2m()]).unwrap();
    let field = &decoded.fields[0];
    assert_eq!(field.value_at(0, 0), Some(0.0));
    assert_eq!(field.value_at(0, 1), None);
    assert_eq!(field.value_at(0, 2), Some(2000.0));
    assert_eq!(field.value_at(3, 2), Some(2003.0));
    assert_eq!(field.value_at(3, 3), None);
}

#[test]
fn test_reused_bitmap() {
    let mask = [(0usize, 0usize), (2, 1)];
    let temps = with_nans(vec![280.0; 9], 3, &mask);
    let dewpoints = with_nans(vec![270.5; 9], 3, &mask);

    let message = Grib2Builder::lat_lon(3, 3, 40.0, -100.0, 1.0, 1.0)
        .with_field(FieldBuilder::temperature_2m(temps))
        .with_field(
            FieldBuilder::new(0, 6, 103, 2, dewpoints).with_missing(MissingEncoding::ReuseBitmap),
        )
        .build();

    let selectors = [
        t2m(),
        VariableSelector::new("dewpoint_2m", "DPT").at_level(103, 2.0),
    ];
    let decoded = GridDecoder::new().decode_bytes(&message, &selectors).unwrap();
    let dewpoint = decoded.field("dewpoint_2m").unwrap();
    assert_eq!(dewpoint.value_at(0, 0), None);
    assert_eq!(dewpoint.value_at(1, 2), None);
    assert_approx_eq!(dewpoint.value_at(1, 1).unwrap(), 270.5, 1e-4);
}

#[test]
fn test_missing_value_management() {
    let values = with_nans(create_test_grid(4, 3), 4, &[(0, 1), (1, 1), (2, 1), (3, 1)]);
    let message = Grib2Builder::lat_lon(4, 3, 40.0, -100.0, 1.0, 1.0)
        .with_field(
            FieldBuilder::temperature_2m(values)
                .with_decimal_scale(0)
                .with_packing(PackingMethod::SpatialDifferencing(1))
                .with_missing(MissingEncoding::MissingValueManagement),
        )
        .build();

    let decoded = GridDecoder::new().decode_bytes(&message, &[t2m()]).unwrap();
    let field = &decoded.fields[0];
    assert!((0..4).all(|col| field.value_at(1, col).is_none()));
    assert_eq!(field.value_at(0, 3), Some(3000.0));
    assert_eq!(field.value_at(2, 1), Some(1002.0));
}

#[test]
fn test_missing_variables_are_reported() {
    let message = Grib2Builder::lat_lon(2, 2, 40.0, -100.0, 1.0, 1.0)
        .with_field(FieldBuilder::temperature_2m(vec![290.0; 4]))
        .build();

    let selectors = [t2m(), VariableSelector::new("total_cloud_cover", "TCDC")];
    let decoded = GridDecoder::new().decode_bytes(&message, &selectors).unwrap();
    assert_eq!(decoded.fields.len(), 1);
    assert_eq!(decoded.missing, vec!["total_cloud_cover".to_string()]);

    let none = GridDecoder::new()
        .decode_bytes(&message, &[VariableSelector::new("total_cloud_cover", "TCDC")])
        .unwrap();
    assert!(none.grid.is_none());
    assert!(none.fields.is_empty());
}

#[test]
fn test_levels_distinguish_fields() {
    let message = Grib2Builder::lat_lon(2, 1, 40.0, -100.0, 1.0, 1.0)
        .with_field(FieldBuilder::new(2, 2, 103, 10, vec![1.0, 2.0]))
        .with_field(FieldBuilder::new(2, 2, 103, 80, vec![5.0, 6.0]))
        .build();

    let selectors = [
        VariableSelector::new("u_component_wind_80m", "UGRD").at_level(103, 80.0),
        VariableSelector::new("u_component_wind_10m", "u-component of wind").at_level(103, 10.0),
    ];
    let decoded = GridDecoder::new().decode_bytes(&message, &selectors).unwrap();
    assert_eq!(decoded.field("u_component_wind_80m").unwrap().value_at(0, 1), Some(6.0));
    assert_eq!(decoded.field("u_component_wind_10m").unwrap().value_at(0, 0), Some(1.0));
}

#[test]
fn test_first_matching_message_wins() {
    let first = Grib2Builder::lat_lon(2, 1, 40.0, -100.0, 1.0, 1.0)
        .with_field(FieldBuilder::temperature_2m(vec![280.0, 281.0]))
        .build();
    let second = Grib2Builder::lat_lon(2, 1, 40.0, -100.0, 1.0, 1.0)
        .with_field(FieldBuilder::temperature_2m(vec![300.0, 301.0]))
        .build();

    let decoded = GridDecoder::new()
        .decode_bytes(&concat_messages(&[first, second]), &[t2m()])
        .unwrap();
    assert_eq!(decoded.messages, 2);
    assert_eq!(decoded.fields[0].value_at(0, 0), Some(280.0));
}

#[test]
fn test_grid_mismatch_between_selected_messages() {
    let first = Grib2Builder::lat_lon(2, 2, 40.0, -100.0, 1.0, 1.0)
        .with_field(FieldBuilder::temperature_2m(vec![280.0; 4]))
        .build();
    let second = Grib2Builder::lat_lon(3, 2, 40.0, -100.0, 1.0, 1.0)
        .with_field(FieldBuilder::new(0, 6, 103, 2, vec![270.0; 6]))
        .build();

    let selectors = [t2m(), VariableSelector::new("dewpoint_2m", "DPT")];
    let result = GridDecoder::new().decode_bytes(&concat_messages(&[first, second]), &selectors);
    assert!(matches!(result, Err(Grib2Error::GridMismatch { message: 1, .. })));
}

#[test]
fn test_unselected_grid_is_not_compared() {
    let first = Grib2Builder::lat_lon(2, 2, 40.0, -100.0, 1.0, 1.0)
        .with_field(FieldBuilder::temperature_2m(vec![280.0; 4]))
        .build();
    let other = Grib2Builder::lat_lon(3, 2, 10.0, 0.0, 1.0, 1.0)
        .with_field(FieldBuilder::new(0, 6, 103, 2, vec![270.0; 6]))
        .build();

    let decoded = GridDecoder::new()
        .decode_bytes(&concat_messages(&[first, other]), &[t2m()])
        .unwrap();
    assert_eq!(decoded.fields.len(), 1);
}

#[test]
fn test_unsupported_scanning_mode() {
    let message = Grib2Builder::lat_lon(2, 2, 40.0, -100.0, 1.0, 1.0)
        .with_scanning_mode(0x20)
        .with_field(FieldBuilder::temperature_2m(vec![280.0; 4]))
        .build();

    let result = GridDecoder::new().decode_bytes(&message, &[t2m()]);
    assert!(matches!(result, Err(Grib2Error::UnsupportedScanningMode(0x20))));
}

#[test]
fn test_truncated_file() {
    let message = Grib2Builder::lat_lon(2, 2, 40.0, -100.0, 1.0, 1.0)
        .with_field(FieldBuilder::temperature_2m(create_test_grid(2, 2)))
        .build();

    let truncated = &message[..message.len() - 10];
    assert!(GridDecoder::new().decode_bytes(truncated, &[t2m()]).is_err());
}

#[test]
fn test_decode_file_and_gzip() {
    let dir = temp_test_dir();
    let message = Grib2Builder::lat_lon(2, 2, 40.0, -100.0, 1.0, 1.0)
        .with_field(FieldBuilder::temperature_2m(vec![281.5; 4]))
        .build();

    let plain = write_grib2_file(dir.path(), "plain.grib2", &[message.clone()]).unwrap();
    let decoded = GridDecoder::new().decode_file(&plain, &[t2m()]).unwrap();
    assert_approx_eq!(decoded.fields[0].value_at(0, 0).unwrap(), 281.5, 1e-4);

    let gz_path = dir.path().join("packed.grib2.gz");
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&message).unwrap();
    std::fs::write(&gz_path, encoder.finish().unwrap()).unwrap();

    let decoded = GridDecoder::new().decode_file(&gz_path, &[t2m()]).unwrap();
    assert_eq!(decoded.fields.len(), 1);
}

#[test]
fn test_decode_error_names_file() {
    let dir = temp_test_dir();
    let path = dir.path().join("missing.grib2");
    let err = GridDecoder::new().decode_file(&path, &[t2m()]).unwrap_err();
    assert_eq!(err.path, path);
    assert!(err.to_string().contains("missing.grib2"));
}

#[test]
fn test_real_hrrr_file() {
    let path = test_utils::require_test_file!("hrrr.t12z.wrfsfcf01.grib2");
    let decoded = GridDecoder::new().decode_file(&path, &[t2m()]).unwrap();

    let grid = decoded.grid.as_ref().unwrap();
    assert_eq!(grid.shape(), (1059, 1799));
    let field = decoded.field("temperature_2m").unwrap();
    let value = field.value_at(500, 900).unwrap();
    assert!((180.0..340.0).contains(&value));
}
