//! GeoTIFF band reading and image export through gdal.

use crate::error::{Error, Result};
use crate::raster::{GeoTransform, Raster};
use gdal::{raster::Buffer, spatial_ref::SpatialRef, Dataset, DriverManager, Metadata};
use ndarray::Array2;
use std::path::Path;

/// written wherever a pixel is masked
pub const NODATA: f64 = -9999.0;

/// reads the first band of a GeoTIFF with its geotransform; the file's
/// nodata value becomes NaN
pub fn read_band(path: &Path) -> Result<(GeoTransform, Array2<f64>)> {
    let ds = Dataset::open(path)?;
    let geotransform = ds.geo_transform()?;
    let (cols, rows) = ds.raster_size();

    let band = ds.rasterband(1)?;
    let nodata = band.no_data_value();
    let buffer = band.read_as::<f64>((0, 0), (cols, rows), (cols, rows), None)?;

    let mut data = Array2::from_shape_vec((rows, cols), buffer.data)
        .map_err(|e| Error::Service(format!("{}: {e}", path.display())))?;
    if let Some(nodata) = nodata {
        data.mapv_inplace(|v| if v == nodata { f64::NAN } else { v });
    }
    Ok((geotransform, data))
}

/// writes every band of `raster` into one GeoTIFF, masked pixels as [`NODATA`]
pub fn write_raster(output_path: &Path, raster: &Raster, crs: &str) -> Result<()> {
    let (rows, cols) = raster.shape();
    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let mut ds = driver.create_with_band_type::<f64, _>(
        output_path,
        cols as isize,
        rows as isize,
        raster.bands().len() as isize,
    )?;
    ds.set_geo_transform(raster.transform())?;
    ds.set_projection(&SpatialRef::from_definition(crs)?.to_wkt()?)?;

    for (index, band) in raster.bands().iter().enumerate() {
        let data: Vec<f64> = band
            .data
            .iter()
            .zip(raster.valid().iter())
            .map(|(v, ok)| if *ok { *v } else { NODATA })
            .collect();

        let mut out = ds.rasterband(index as isize + 1)?;
        out.set_no_data_value(Some(NODATA))?;
        out.set_description(&band.name)?;
        out.write(
            (0, 0),
            (cols, rows),
            &Buffer {
                size: (cols, rows),
                data,
            },
        )?;
    }
    Ok(())
}
