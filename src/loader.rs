use std::collections::HashSet;
use std::fs::File;
use std::path::Path;

use chrono::NaiveDate;
use log::{debug, info};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::config::DashboardConfig;
use crate::error::{DashboardError, Result};
use crate::models::{HospitalData, PatientRecord, RawTable, Service, WeeklyServiceStat};

const PATIENT_COLUMNS: [&str; 5] = [
    "service",
    "arrival_date",
    "departure_date",
    "age",
    "satisfaction",
];

const WEEKLY_COLUMNS: [&str; 4] = ["week", "service", "patients_admitted", "patients_request"];

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y-%m-%d %H:%M:%S", "%Y/%m/%d"];

#[derive(Deserialize)]
struct PatientRow {
    patient_id: Option<String>,
    service: String,
    arrival_date: String,
    departure_date: String,
    age: u32,
    satisfaction: f64,
}

#[derive(Deserialize)]
struct WeeklyRow {
    week: u32,
    #[serde(default)]
    month: Option<u32>,
    service: String,
    #[serde(default)]
    available_beds: Option<u32>,
    patients_request: u32,
    patients_admitted: u32,
    #[serde(default)]
    patients_refused: Option<u32>,
    #[serde(default)]
    patient_satisfaction: Option<f64>,
    #[serde(default)]
    staff_morale: Option<f64>,
    #[serde(default)]
    event: Option<String>,
}

/// Loads all four tables; any failure aborts, there is no partial load.
pub fn load_all(config: &DashboardConfig) -> Result<HospitalData> {
    let data = HospitalData {
        patients: load_patients(&config.patients_path())?,
        services_weekly: load_services_weekly(&config.services_weekly_path())?,
        staff: load_raw_table(&config.staff_path())?,
        staff_schedule: load_raw_table(&config.staff_schedule_path())?,
    };

    info!(
        "loaded {} patients, {} weekly service rows, {} staff, {} schedule rows",
        data.patients.len(),
        data.services_weekly.len(),
        data.staff.len(),
        data.staff_schedule.len()
    );
    Ok(data)
}

pub fn load_patients(path: &Path) -> Result<Vec<PatientRecord>> {
    let file = file_label(path);
    let rows: Vec<(usize, PatientRow)> = read_rows(path, &PATIENT_COLUMNS)?;
    let mut patients = Vec::with_capacity(rows.len());

    for (line, row) in rows {
        let format_error = |message: String| DashboardError::DataFormat {
            file: file.clone(),
            row: line,
            message,
        };

        let service = parse_service(&row.service).map_err(&format_error)?;
        let arrival_date = parse_date(&row.arrival_date)
            .ok_or_else(|| format_error(format!("unparsable arrival_date `{}`", row.arrival_date)))?;
        let departure_date = parse_date(&row.departure_date).ok_or_else(|| {
            format_error(format!("unparsable departure_date `{}`", row.departure_date))
        })?;
        let stay_days = stay_days(arrival_date, departure_date).ok_or_else(|| {
            format_error(format!(
                "departure_date {departure_date} is before arrival_date {arrival_date}"
            ))
        })?;
        if !row.satisfaction.is_finite() {
            return Err(format_error("satisfaction is not a finite number".to_string()));
        }

        patients.push(PatientRecord {
            patient_id: row.patient_id.filter(|id| !id.trim().is_empty()),
            service,
            arrival_date,
            departure_date,
            stay_days,
            age: row.age,
            satisfaction: row.satisfaction,
        });
    }

    debug!("{file}: {} patient records", patients.len());
    Ok(patients)
}

pub fn load_services_weekly(path: &Path) -> Result<Vec<WeeklyServiceStat>> {
    let file = file_label(path);
    let rows: Vec<(usize, WeeklyRow)> = read_rows(path, &WEEKLY_COLUMNS)?;
    let mut seen: HashSet<(u32, Service)> = HashSet::new();
    let mut stats = Vec::with_capacity(rows.len());

    for (line, row) in rows {
        let format_error = |message: String| DashboardError::DataFormat {
            file: file.clone(),
            row: line,
            message,
        };

        let service = parse_service(&row.service).map_err(&format_error)?;
        if !(1..=53).contains(&row.week) {
            return Err(format_error(format!("week {} is outside 1..=53", row.week)));
        }
        if !seen.insert((row.week, service)) {
            return Err(format_error(format!(
                "duplicate row for week {} and service {service}",
                row.week
            )));
        }

        stats.push(WeeklyServiceStat {
            week: row.week,
            month: row.month,
            service,
            available_beds: row.available_beds,
            patients_request: row.patients_request,
            patients_admitted: row.patients_admitted,
            patients_refused: row.patients_refused,
            patient_satisfaction: row.patient_satisfaction,
            staff_morale: row.staff_morale,
            event: row.event.filter(|e| !e.trim().is_empty()),
        });
    }

    debug!("{file}: {} weekly rows", stats.len());
    Ok(stats)
}

pub fn load_raw_table(path: &Path) -> Result<RawTable> {
    let file = file_label(path);
    let mut reader = open_reader(path)?;
    let headers = reader
        .headers()
        .map_err(|e| csv_error(path, &file, 1, e))?
        .iter()
        .map(str::to_string)
        .collect();

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record.map_err(|e| csv_error(path, &file, index + 2, e))?;
        rows.push(record.iter().map(str::to_string).collect());
    }

    Ok(RawTable { headers, rows })
}

/// Whole days between arrival and departure, or `None` when departure precedes arrival.
pub fn stay_days(arrival: NaiveDate, departure: NaiveDate) -> Option<u32> {
    u32::try_from((departure - arrival).num_days()).ok()
}

pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    DATE_FORMATS.iter().find_map(|format| {
        NaiveDate::parse_from_str(value, format)
            .ok()
            .or_else(|| {
                chrono::NaiveDateTime::parse_from_str(value, format)
                    .ok()
                    .map(|dt| dt.date())
            })
    })
}

fn parse_service(value: &str) -> std::result::Result<Service, String> {
    value
        .parse::<Service>()
        .map_err(|_| format!("unknown service `{value}`"))
}

fn read_rows<T: DeserializeOwned>(path: &Path, required: &[&str]) -> Result<Vec<(usize, T)>> {
    let file = file_label(path);
    let mut reader = open_reader(path)?;
    let headers = reader
        .headers()
        .map_err(|e| csv_error(path, &file, 1, e))?
        .clone();

    for column in required {
        if !headers.iter().any(|h| h.trim() == *column) {
            return Err(DashboardError::Schema {
                file,
                column: column.to_string(),
            });
        }
    }

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let line = index + 2;
        let record = record.map_err(|e| csv_error(path, &file, line, e))?;
        let row: T = record
            .deserialize(Some(&headers))
            .map_err(|e| DashboardError::DataFormat {
                file: file.clone(),
                row: line,
                message: e.to_string(),
            })?;
        rows.push((line, row));
    }
    Ok(rows)
}

fn open_reader(path: &Path) -> Result<csv::Reader<File>> {
    let handle = File::open(path).map_err(|source| DashboardError::DataSource {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .from_reader(handle))
}

fn csv_error(path: &Path, file: &str, row: usize, err: csv::Error) -> DashboardError {
    match err.into_kind() {
        csv::ErrorKind::Io(source) => DashboardError::DataSource {
            path: path.to_path_buf(),
            source,
        },
        other => DashboardError::DataFormat {
            file: file.to_string(),
            row,
            message: format!("{other:?}"),
        },
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn stay_days_is_whole_day_difference() {
        let arrival = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let departure = NaiveDate::from_ymd_opt(2025, 3, 11).unwrap();
        assert_eq!(stay_days(arrival, departure), Some(10));
        assert_eq!(stay_days(arrival, arrival), Some(0));
        assert_eq!(stay_days(departure, arrival), None);
    }

    #[test]
    fn parses_dates_with_and_without_time() {
        let expected = NaiveDate::from_ymd_opt(2025, 1, 14);
        assert_eq!(parse_date("2025-01-14"), expected);
        assert_eq!(parse_date("2025-01-14 00:00:00"), expected);
        assert_eq!(parse_date("14 Jan"), None);
    }

    #[test]
    fn loads_patients_and_derives_stay() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "patients.csv",
            "patient_id,name,age,arrival_date,departure_date,service,satisfaction\n\
             PAT-1,Ann,54,2025-01-01,2025-01-05,surgery,81\n\
             PAT-2,Bob,23,2025-02-10,2025-02-10,ICU,67\n",
        );

        let patients = load_patients(&path).unwrap();
        assert_eq!(patients.len(), 2);
        assert_eq!(patients[0].stay_days, 4);
        assert_eq!(patients[0].service, Service::Surgery);
        assert_eq!(patients[1].stay_days, 0);
        assert_eq!(patients[1].patient_id.as_deref(), Some("PAT-2"));
    }

    #[test]
    fn rejects_departure_before_arrival() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "patients.csv",
            "age,arrival_date,departure_date,service,satisfaction\n\
             40,2025-01-05,2025-01-01,surgery,80\n",
        );

        match load_patients(&path) {
            Err(DashboardError::DataFormat { row, .. }) => assert_eq!(row, 2),
            other => panic!("expected DataFormat, got {other:?}"),
        }
    }

    #[test]
    fn rejects_unparsable_date() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "patients.csv",
            "age,arrival_date,departure_date,service,satisfaction\n\
             40,yesterday,2025-01-01,surgery,80\n",
        );
        assert!(matches!(
            load_patients(&path),
            Err(DashboardError::DataFormat { .. })
        ));
    }

    #[test]
    fn missing_column_is_schema_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "patients.csv",
            "age,arrival_date,departure_date,service\n40,2025-01-01,2025-01-02,ICU\n",
        );
        match load_patients(&path) {
            Err(DashboardError::Schema { column, .. }) => assert_eq!(column, "satisfaction"),
            other => panic!("expected Schema, got {other:?}"),
        }
    }

    #[test]
    fn missing_file_is_data_source_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_patients(&dir.path().join("nope.csv"));
        assert!(matches!(result, Err(DashboardError::DataSource { .. })));
    }

    #[test]
    fn weekly_rows_alias_beds_used_and_reject_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "services_weekly.csv",
            "week,month,service,available_beds,patients_request,patients_admitted,event\n\
             1,1,emergency,32,76,32,none\n\
             1,1,ICU,10,12,9,\n",
        );
        let stats = load_services_weekly(&path).unwrap();
        assert_eq!(stats[0].beds_used(), 32);
        assert_eq!(stats[1].event, None);

        let dup = write_file(
            dir.path(),
            "dup.csv",
            "week,service,patients_request,patients_admitted\n\
             3,ICU,5,4\n\
             3,ICU,6,5\n",
        );
        assert!(matches!(
            load_services_weekly(&dup),
            Err(DashboardError::DataFormat { row: 3, .. })
        ));
    }

    #[test]
    fn unknown_service_is_data_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "services_weekly.csv",
            "week,service,patients_request,patients_admitted\n1,cardiology,5,4\n",
        );
        assert!(matches!(
            load_services_weekly(&path),
            Err(DashboardError::DataFormat { .. })
        ));
    }

    #[test]
    fn week_outside_year_is_data_format_error() {
        let dir = tempfile::tempdir().unwrap();
        for week in [0, 54] {
            let path = write_file(
                dir.path(),
                "services_weekly.csv",
                &format!("week,service,patients_request,patients_admitted\n{week},ICU,5,4\n"),
            );
            match load_services_weekly(&path) {
                Err(DashboardError::DataFormat { row, message, .. }) => {
                    assert_eq!(row, 2);
                    assert!(message.contains(&week.to_string()), "{message}");
                }
                other => panic!("week {week}: expected DataFormat, got {other:?}"),
            }
        }
    }

    #[test]
    fn weekly_missing_admitted_column_is_schema_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "services_weekly.csv",
            "week,service,patients_request\n1,ICU,5\n",
        );
        match load_services_weekly(&path) {
            Err(DashboardError::Schema { file, column }) => {
                assert_eq!(file, "services_weekly.csv");
                assert_eq!(column, "patients_admitted");
            }
            other => panic!("expected Schema, got {other:?}"),
        }
    }

    #[test]
    fn raw_tables_pass_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "staff.csv",
            "staff_id,staff_name,role,service\nSTF-1,Dana,doctor,ICU\n",
        );
        let table = load_raw_table(&path).unwrap();
        assert_eq!(table.headers.len(), 4);
        assert_eq!(table.rows[0][1], "Dana");
    }
}
