//! Preloaded-zones detection (§4.2d): zones come from an externally supplied
//! frame (or a path to one) rather than being derived by a predicate. Useful
//! for feeding hand-labeled zones, or zones produced by a system outside this
//! crate, through the same feature-extraction and aggregation pipeline.
//!
//! Expected columns: either `start_idx`/`end_idx` or `start_time`/`end_time`
//! (snapped to the nearest bar in the loaded data), plus `type`
//! (string). Optional `zone_id` and `indicator` columns are also honored;
//! anything else is ignored. Rows must be chronologically ordered and
//! non-overlapping after snapping to bars (§4.2d).

use polars::prelude::*;
use serde_json::Value;

use super::{filter_by_min_duration, DetectionConfig, DetectionRules, DetectionStrategy, PreloadedSource};
use crate::error::{Result, ZoneError};
use crate::util::{naive_datetime_at, nearest_bar_index};
use crate::zone::{IndicatorContext, Zone, ZoneId};

pub struct PreloadedStrategy;

fn column_naive_datetime(col: &Column, row: usize) -> Result<Option<chrono::NaiveDateTime>> {
    use chrono::NaiveDate;
    match col.dtype() {
        DataType::Date => {
            let days = col.date()?.phys.get(row);
            Ok(days
                .and_then(|d| NaiveDate::from_num_days_from_ce_opt(d + 719_163))
                .map(|d| d.and_hms_opt(0, 0, 0).unwrap()))
        }
        DataType::Datetime(tu, _) => {
            let val = col.datetime()?.phys.get(row);
            Ok(val.and_then(|v| match tu {
                TimeUnit::Milliseconds => chrono::DateTime::from_timestamp_millis(v),
                TimeUnit::Microseconds => chrono::DateTime::from_timestamp_micros(v),
                TimeUnit::Nanoseconds => chrono::DateTime::from_timestamp(v / 1_000_000_000, (v % 1_000_000_000) as u32),
            }
            .map(|dt| dt.naive_utc())))
        }
        other => Err(ZoneError::data(format!("start_time/end_time column has unsupported dtype {other:?}"))),
    }
}

fn load_zones_frame(source: &PreloadedSource) -> Result<DataFrame> {
    match source {
        PreloadedSource::DataFrame(df) => Ok(df.clone()),
        PreloadedSource::Path(path) => {
            let file = std::fs::File::open(path)
                .map_err(|e| ZoneError::data(format!("failed to open preloaded zones file '{path}': {e}")))?;
            CsvReadOptions::default()
                .with_has_header(true)
                .into_reader_with_file_handle(file)
                .finish()
                .map_err(|e| ZoneError::data(format!("failed to parse preloaded zones file '{path}': {e}")))
        }
    }
}

impl DetectionStrategy for PreloadedStrategy {
    fn name(&self) -> &'static str {
        "preloaded"
    }

    fn vocabulary(&self) -> &'static [&'static str] {
        &[]
    }

    fn detect(&self, data: &DataFrame, config: &DetectionConfig) -> Result<Vec<Zone>> {
        let source = match &config.rules {
            DetectionRules::Preloaded { source } => source,
            _ => {
                return Err(ZoneError::config(
                    "PreloadedStrategy requires DetectionRules::Preloaded",
                ))
            }
        };

        let spec = load_zones_frame(source)?;
        let zone_type_col = spec
            .column("type")
            .map_err(|_| ZoneError::data("preloaded zones frame missing 'type' column"))?
            .cast(&DataType::String)?;
        let zone_id_col = spec.column("zone_id").ok().and_then(|c| c.cast(&DataType::String).ok());
        let indicator_col = spec.column("indicator").ok().and_then(|c| c.cast(&DataType::String).ok());
        let type_ca = zone_type_col.str()?;

        let uses_time_columns = spec.column("start_time").is_ok() && spec.column("end_time").is_ok();

        let mut zones = Vec::with_capacity(spec.height());
        let mut previous_end: Option<usize> = None;
        for row in 0..spec.height() {
            let (start, end) = if uses_time_columns {
                let start_time_col = spec.column("start_time")?;
                let end_time_col = spec.column("end_time")?;
                let start_target = column_naive_datetime(start_time_col, row)?
                    .ok_or_else(|| ZoneError::data(format!("null start_time at preloaded row {row}")))?;
                let end_target = column_naive_datetime(end_time_col, row)?
                    .ok_or_else(|| ZoneError::data(format!("null end_time at preloaded row {row}")))?;
                let start = nearest_bar_index(data, "timestamp", start_target)
                    .or_else(|_| nearest_bar_index(data, "date", start_target))?;
                let end = nearest_bar_index(data, "timestamp", end_target)
                    .or_else(|_| nearest_bar_index(data, "date", end_target))?;
                (start, end)
            } else {
                let start_idx_col = spec
                    .column("start_idx")
                    .map_err(|_| ZoneError::data("preloaded zones frame missing 'start_idx'/'start_time' column"))?
                    .cast(&DataType::Int64)?;
                let end_idx_col = spec
                    .column("end_idx")
                    .map_err(|_| ZoneError::data("preloaded zones frame missing 'end_idx'/'end_time' column"))?
                    .cast(&DataType::Int64)?;
                let start = start_idx_col
                    .i64()?
                    .get(row)
                    .ok_or_else(|| ZoneError::data(format!("null start_idx at preloaded row {row}")))?
                    as usize;
                let end = end_idx_col
                    .i64()?
                    .get(row)
                    .ok_or_else(|| ZoneError::data(format!("null end_idx at preloaded row {row}")))?
                    as usize;
                (start, end)
            };
            if end >= data.height() || end < start {
                return Err(ZoneError::data(format!(
                    "preloaded zone row {row} has invalid bounds [{start}, {end}] for {} bars",
                    data.height()
                )));
            }
            if let Some(prev_end) = previous_end {
                if start <= prev_end {
                    return Err(ZoneError::data(format!(
                        "preloaded zone row {row} starts at {start}, which overlaps or precedes the prior zone ending at {prev_end}; rows must be chronologically ordered and non-overlapping"
                    )));
                }
            }
            previous_end = Some(end);
            let zone_type = type_ca
                .get(row)
                .ok_or_else(|| ZoneError::data(format!("null 'type' at preloaded row {row}")))?
                .to_string();
            let zone_id = zone_id_col
                .as_ref()
                .and_then(|c| c.str().ok())
                .and_then(|ca| ca.get(row))
                .map(|s| ZoneId::Str(s.to_string()))
                .unwrap_or(ZoneId::Int(row as i64));
            let detection_indicator = indicator_col
                .as_ref()
                .and_then(|c| c.str().ok())
                .and_then(|ca| ca.get(row))
                .map(Value::from)
                .unwrap_or_else(|| Value::from("external"));

            let slice = data.slice(start as i64, end - start + 1);
            let start_time = naive_datetime_at(data, "timestamp", start)
                .or_else(|_| naive_datetime_at(data, "date", start))?;
            let end_time = naive_datetime_at(data, "timestamp", end)
                .or_else(|_| naive_datetime_at(data, "date", end))?;
            let ctx = IndicatorContext::new()
                .with("detection_strategy", "preloaded")
                .with("detection_indicator", detection_indicator)
                .with("source", "external");
            zones.push(Zone::new(
                zone_id, zone_type, start, end, start_time, end_time, slice, ctx,
            )?);
        }
        Ok(filter_by_min_duration(zones, config.min_duration)
            .into_iter()
            .filter(|z| config.keep_type(&z.zone_type))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn bars(n: usize) -> DataFrame {
        let dates: Vec<i32> = (0..n as i32)
            .map(|i| {
                (NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(i as i64))
                    .signed_duration_since(NaiveDate::from_ymd_opt(1970, 1, 1).unwrap())
                    .num_days() as i32
            })
            .collect();
        let close: Vec<f64> = (0..n).map(|i| i as f64).collect();
        let mut df = df! { "date" => dates, "close" => close }.unwrap();
        df.try_apply("date", |s| s.cast(&DataType::Date)).unwrap();
        df
    }

    #[test]
    fn preloaded_frame_produces_matching_zones() {
        let data = bars(10);
        let spec = df! {
            "zone_id" => &["z1", "z2"],
            "start_idx" => &[0i64, 4],
            "end_idx" => &[3i64, 9],
            "type" => &["custom_a", "custom_b"],
        }
        .unwrap();
        let config = DetectionConfig::new(
            "preloaded",
            DetectionRules::preloaded(super::super::PreloadedSource::DataFrame(spec)),
        );
        let zones = PreloadedStrategy.detect(&data, &config).unwrap();
        assert_eq!(zones.len(), 2);
        assert_eq!(zones[0].zone_type, "custom_a");
        assert_eq!(zones[0].duration(), 4);
        assert_eq!(zones[1].zone_type, "custom_b");
    }

    #[test]
    fn out_of_range_zone_is_data_error() {
        let data = bars(5);
        let spec = df! {
            "start_idx" => &[0i64],
            "end_idx" => &[20i64],
            "type" => &["bad"],
        }
        .unwrap();
        let config = DetectionConfig::new(
            "preloaded",
            DetectionRules::preloaded(super::super::PreloadedSource::DataFrame(spec)),
        );
        let err = PreloadedStrategy.detect(&data, &config).unwrap_err();
        assert!(matches!(err, ZoneError::Data(_)));
    }

    #[test]
    fn overlapping_rows_are_rejected() {
        let data = bars(10);
        let spec = df! {
            "start_idx" => &[0i64, 3],
            "end_idx" => &[5i64, 8],
            "type" => &["custom_a", "custom_b"],
        }
        .unwrap();
        let config = DetectionConfig::new(
            "preloaded",
            DetectionRules::preloaded(super::super::PreloadedSource::DataFrame(spec)),
        );
        let err = PreloadedStrategy.detect(&data, &config).unwrap_err();
        assert!(matches!(err, ZoneError::Data(_)));
    }

    #[test]
    fn out_of_order_rows_are_rejected() {
        let data = bars(10);
        let spec = df! {
            "start_idx" => &[5i64, 0],
            "end_idx" => &[9i64, 4],
            "type" => &["custom_a", "custom_b"],
        }
        .unwrap();
        let config = DetectionConfig::new(
            "preloaded",
            DetectionRules::preloaded(super::super::PreloadedSource::DataFrame(spec)),
        );
        let err = PreloadedStrategy.detect(&data, &config).unwrap_err();
        assert!(matches!(err, ZoneError::Data(_)));
    }

    #[test]
    fn start_time_end_time_columns_snap_to_nearest_bar() {
        let data = bars(10);
        let mut spec = df! {
            "start_time" => &[0i32, 6],
            "end_time" => &[3i32, 9],
            "type" => &["custom_a", "custom_b"],
            "indicator" => &["rsi_14", "macd"],
        }
        .unwrap();
        spec.try_apply("start_time", |s| s.cast(&DataType::Date)).unwrap();
        spec.try_apply("end_time", |s| s.cast(&DataType::Date)).unwrap();
        let config = DetectionConfig::new(
            "preloaded",
            DetectionRules::preloaded(super::super::PreloadedSource::DataFrame(spec)),
        );
        let zones = PreloadedStrategy.detect(&data, &config).unwrap();
        assert_eq!(zones.len(), 2);
        assert_eq!(zones[0].start_idx, 0);
        assert_eq!(zones[0].end_idx, 3);
        assert_eq!(
            zones[0].indicator_context.0.get("detection_indicator").and_then(|v| v.as_str()),
            Some("rsi_14")
        );
        assert_eq!(
            zones[0].indicator_context.0.get("source").and_then(|v| v.as_str()),
            Some("external")
        );
    }

    #[test]
    fn missing_indicator_column_defaults_to_external() {
        let data = bars(10);
        let spec = df! {
            "start_idx" => &[0i64],
            "end_idx" => &[3i64],
            "type" => &["custom_a"],
        }
        .unwrap();
        let config = DetectionConfig::new(
            "preloaded",
            DetectionRules::preloaded(super::super::PreloadedSource::DataFrame(spec)),
        );
        let zones = PreloadedStrategy.detect(&data, &config).unwrap();
        assert_eq!(
            zones[0].indicator_context.0.get("detection_indicator").and_then(|v| v.as_str()),
            Some("external")
        );
    }
}
