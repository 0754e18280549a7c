//! The installation verification run: load `STAFFVS` through the bridge
//! driver, average it by department and print the result twice.

use crate::dataframe::{DEFAULT_SHOW_ROWS, DEFAULT_SHOW_TRUNCATE};
use crate::error::SparkError;
use crate::session::{SparkSession, SparkSessionBuilder};
use crate::table::LocalTable;
use crate::DataFrame;

use clap::Parser;
use log::{debug, info};
use std::ffi::OsString;
use std::future::Future;
use std::io::Write;

pub const APP_NAME: &str = "izodaIVP";
pub const DRIVER: &str = "com.rs.jdbc.dv.DvDriver";
pub const TABLE: &str = "STAFFVS";
pub const DEPT_COLUMN: &str = "STAFFVS_DATA_DEPT";
pub const YEARS_COLUMN: &str = "STAFFVS_DATA_YRS";
pub const LAST_NAME_COLUMN: &str = "STAFFVS_DATA_NAME_L";

pub const HELP_TEXT: &str = "
    Usage:
        spark-ivp [mdssURL]
    ";

/// Session settings the run always applies.
const SESSION_CONFIGS: [(&str, &str); 1] = [("spark.files.overwrite", "true")];

/// Command line: exactly one positional argument after the program name.
#[derive(Parser, Debug, PartialEq, Eq)]
#[command(name = "spark-ivp", disable_help_flag = true, disable_version_flag = true)]
pub struct Cli {
    /// JDBC URL of the MDSS bridge endpoint
    #[arg(value_name = "mdssURL", allow_hyphen_values = true)]
    pub mdss_url: String,
}

impl Cli {
    /// `None` unless argv, program name included, has exactly two entries.
    pub fn from_args<I, T>(args: I) -> Option<Cli>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Cli::try_parse_from(args).ok()
    }
}

/// Where and how to read the source table through the bridge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JdbcSource {
    pub driver: String,
    pub url: String,
    pub table: String,
    pub user: String,
    pub password: String,
}

impl JdbcSource {
    /// The staff table, read without credentials.
    pub fn staff(url: &str) -> JdbcSource {
        JdbcSource {
            driver: DRIVER.to_string(),
            url: url.to_string(),
            table: TABLE.to_string(),
            user: String::new(),
            password: String::new(),
        }
    }

    pub fn options(&self) -> [(&'static str, &str); 5] {
        [
            ("driver", self.driver.as_str()),
            ("url", self.url.as_str()),
            ("dbtable", self.table.as_str()),
            ("user", self.user.as_str()),
            ("password", self.password.as_str()),
        ]
    }
}

/// The engine calls a run depends on.
#[allow(async_fn_in_trait)]
pub trait EngineSession {
    type Frame: EngineFrame;

    async fn load_table(&self, source: &JdbcSource) -> Result<Self::Frame, SparkError>;

    async fn shutdown(self) -> Result<(), SparkError>;
}

#[allow(async_fn_in_trait)]
pub trait EngineFrame: Sized {
    /// Groups by `key`, averages `columns` per group and sorts ascending by `key`.
    fn average_by(self, key: &str, columns: &[&str]) -> Self;

    /// The engine's own tabular printout.
    async fn render(&self) -> Result<String, SparkError>;

    async fn collect_local(&self) -> Result<LocalTable, SparkError>;
}

impl EngineSession for SparkSession {
    type Frame = DataFrame;

    async fn load_table(&self, source: &JdbcSource) -> Result<DataFrame, SparkError> {
        debug!("Loading {} from {} with {}", source.table, source.url, source.driver);

        Ok(self.read().format("jdbc").options(source.options()).load())
    }

    async fn shutdown(self) -> Result<(), SparkError> {
        self.stop().await
    }
}

impl EngineFrame for DataFrame {
    fn average_by(self, key: &str, columns: &[&str]) -> DataFrame {
        self.group_by([key])
            .avg(columns.iter().copied())
            .order_by([key])
    }

    async fn render(&self) -> Result<String, SparkError> {
        self.show_string(DEFAULT_SHOW_ROWS, DEFAULT_SHOW_TRUNCATE, false).await
    }

    async fn collect_local(&self) -> Result<LocalTable, SparkError> {
        self.to_local().await
    }
}

/// How a run ended when nothing failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The arguments were wrong; the help text was printed and no session was created.
    Usage,
    Completed,
}

/// Runs the verification once.
///
/// No session is created unless the arguments are valid. Errors are
/// returned as they happen, without shutting the session down.
pub async fn run<I, T, C, F, S, W>(args: I, connect: C, out: &mut W) -> Result<Outcome, SparkError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
    C: FnOnce() -> F,
    F: Future<Output = Result<S, SparkError>>,
    S: EngineSession,
    W: Write,
{
    let Some(cli) = Cli::from_args(args) else {
        writeln!(out, "{HELP_TEXT}")?;
        return Ok(Outcome::Usage);
    };

    let session = connect().await?;

    let staff = session.load_table(&JdbcSource::staff(&cli.mdss_url)).await?;
    let averages = staff.average_by(DEPT_COLUMN, &[YEARS_COLUMN, LAST_NAME_COLUMN]);

    writeln!(out, "{}", averages.render().await?)?;
    writeln!(out, "{}", averages.collect_local().await?.transpose())?;

    session.shutdown().await?;
    info!("IVP completed");

    Ok(Outcome::Completed)
}

/// Builds the Spark session against `SPARK_REMOTE` or the local default.
pub async fn connect() -> Result<SparkSession, SparkError> {
    SESSION_CONFIGS
        .iter()
        .fold(SparkSessionBuilder::default().app_name(APP_NAME), |builder, (key, value)| {
            builder.config(key, value)
        })
        .get_or_create()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientError, ClientErrorKind};

    use crate::table::{Dtype, Value};

    use std::cell::{Cell, RefCell};
    use std::collections::{BTreeMap, HashMap};
    use std::rc::Rc;

    #[derive(Clone, Debug)]
    struct StaffRow {
        dept: i32,
        years: Option<i32>,
        last_name: String,
    }

    fn staff_rows() -> Vec<StaffRow> {
        let row = |dept, years, last_name: &str| StaffRow { dept, years, last_name: last_name.to_string() };

        vec![
            row(38, Some(5), "MARENGHI"),
            row(20, Some(8), "PERNAL"),
            row(38, Some(6), "O'BRIEN"),
            row(15, Some(10), "HANES"),
            row(20, None, "SNEIDER"),
            row(20, Some(1), "SANDERS"),
            row(15, Some(7), "ROTHMAN"),
        ]
    }

    #[derive(Default)]
    struct Calls {
        connects: Cell<usize>,
        loads: RefCell<Vec<JdbcSource>>,
        shutdowns: Cell<usize>,
    }

    struct FakeSession {
        rows: Vec<StaffRow>,
        fail_load: bool,
        calls: Rc<Calls>,
    }

    /// Evaluates the averaging query locally, the way Spark would: numeric
    /// averages skip nulls, and a string column averages to null.
    #[derive(Debug)]
    struct FakeFrame {
        rows: Vec<StaffRow>,
        averaged: Option<Vec<String>>,
    }

    fn fail(status: tonic::Status) -> SparkError {
        ClientError::new(ClientErrorKind::Stream(status)).into()
    }

    impl EngineSession for FakeSession {
        type Frame = FakeFrame;

        async fn load_table(&self, source: &JdbcSource) -> Result<FakeFrame, SparkError> {
            self.calls.loads.borrow_mut().push(source.clone());
            if self.fail_load {
                return Err(fail(tonic::Status::not_found("table STAFFVS not found")));
            }
            Ok(FakeFrame { rows: self.rows.clone(), averaged: None })
        }

        async fn shutdown(self) -> Result<(), SparkError> {
            self.calls.shutdowns.set(self.calls.shutdowns.get() + 1);
            Ok(())
        }
    }

    impl FakeFrame {
        fn table(&self) -> LocalTable {
            let Some(averaged) = &self.averaged else {
                let rows = self.rows.iter().map(|row| vec![Value::Int(row.dept.into())]).collect();
                return LocalTable::new(vec![DEPT_COLUMN.to_string()], rows).unwrap();
            };

            let mut groups: BTreeMap<i32, Vec<&StaffRow>> = BTreeMap::new();
            for row in &self.rows {
                groups.entry(row.dept).or_default().push(row);
            }

            let mut columns = vec![DEPT_COLUMN.to_string()];
            columns.extend(averaged.iter().map(|column| format!("avg({column})")));

            let rows = groups
                .into_iter()
                .map(|(dept, members)| {
                    let mut cells = vec![Value::Int(dept.into())];
                    for column in averaged {
                        let values: Vec<f64> = members
                            .iter()
                            .filter_map(|row| match column.as_str() {
                                YEARS_COLUMN => row.years.map(f64::from),
                                _ => row.last_name.parse().ok(),
                            })
                            .collect();
                        cells.push(if values.is_empty() {
                            Value::Null
                        } else {
                            Value::Float(values.iter().sum::<f64>() / values.len() as f64)
                        });
                    }
                    cells
                })
                .collect();

            LocalTable::new(columns, rows).unwrap()
        }
    }

    impl EngineFrame for FakeFrame {
        fn average_by(self, key: &str, columns: &[&str]) -> FakeFrame {
            assert_eq!(key, DEPT_COLUMN);
            FakeFrame {
                rows: self.rows,
                averaged: Some(columns.iter().map(|column| column.to_string()).collect()),
            }
        }

        async fn render(&self) -> Result<String, SparkError> {
            Ok(format!("[show]\n{}\n", self.table()))
        }

        async fn collect_local(&self) -> Result<LocalTable, SparkError> {
            Ok(self.table())
        }
    }

    fn harness(fail_load: bool) -> (Rc<Calls>, impl FnOnce() -> std::future::Ready<Result<FakeSession, SparkError>>) {
        let calls = Rc::new(Calls::default());
        let shared = Rc::clone(&calls);

        let connect = move || {
            shared.connects.set(shared.connects.get() + 1);
            std::future::ready(Ok(FakeSession { rows: staff_rows(), fail_load, calls: shared }))
        };

        (calls, connect)
    }

    fn run_with(args: &[&str], fail_load: bool) -> (Result<Outcome, SparkError>, Rc<Calls>, String) {
        let (calls, connect) = harness(fail_load);
        let mut out: Vec<u8> = vec![];

        let result = tokio_test::block_on(run(args.iter().copied(), connect, &mut out));

        (result, calls, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_cli_requires_exactly_one_argument() {
        assert_eq!(Cli::from_args(["spark-ivp"]), None);
        assert_eq!(Cli::from_args(["spark-ivp", "jdbc:rs:dv://a", "extra"]), None);
        assert_eq!(
            Cli::from_args(["spark-ivp", "jdbc:rs:dv://a"]),
            Some(Cli { mdss_url: "jdbc:rs:dv://a".to_string() })
        );
    }

    #[test]
    fn test_cli_takes_flag_like_values_literally() {
        assert_eq!(Cli::from_args(["spark-ivp", "--help"]).unwrap().mdss_url, "--help");
        assert_eq!(Cli::from_args(["spark-ivp", "-V"]).unwrap().mdss_url, "-V");
    }

    #[test]
    fn test_staff_source_uses_bridge_without_credentials() {
        let source = JdbcSource::staff("jdbc:rs:dv://mdss:1200");

        assert_eq!(source.options(), [
            ("driver", "com.rs.jdbc.dv.DvDriver"),
            ("url", "jdbc:rs:dv://mdss:1200"),
            ("dbtable", "STAFFVS"),
            ("user", ""),
            ("password", ""),
        ]);
    }

    #[test]
    fn test_usage_error_never_connects() {
        for args in [&["spark-ivp"][..], &["spark-ivp", "a", "b"][..]] {
            let (result, calls, out) = run_with(args, false);

            assert_eq!(result.unwrap(), Outcome::Usage);
            assert_eq!(out, format!("{HELP_TEXT}\n"));
            assert_eq!(calls.connects.get(), 0);
            assert_eq!(calls.shutdowns.get(), 0);
        }
    }

    #[test]
    fn test_completed_run_loads_prints_and_stops_once() {
        let (result, calls, out) = run_with(&["spark-ivp", "jdbc:rs:dv://mdss:1200"], false);

        assert_eq!(result.unwrap(), Outcome::Completed);
        assert_eq!(calls.connects.get(), 1);
        assert_eq!(calls.shutdowns.get(), 1);
        assert_eq!(*calls.loads.borrow(), vec![JdbcSource::staff("jdbc:rs:dv://mdss:1200")]);

        let (show, transposed) = out.split_once("\n\n").unwrap();
        assert!(show.starts_with("[show]\n"));
        assert!(transposed.starts_with(" "));
        assert!(transposed.contains(&format!("avg({YEARS_COLUMN})")));
    }

    #[test]
    fn test_averages_one_row_per_department_sorted() {
        let frame = FakeFrame { rows: staff_rows(), averaged: None }
            .average_by(DEPT_COLUMN, &[YEARS_COLUMN, LAST_NAME_COLUMN]);

        let table = tokio_test::block_on(frame.collect_local()).unwrap();

        assert_eq!(table.columns(), [
            DEPT_COLUMN.to_string(),
            format!("avg({YEARS_COLUMN})"),
            format!("avg({LAST_NAME_COLUMN})"),
        ]);
        assert_eq!(table.rows(), [
            vec![Value::Int(15), Value::Float(8.5), Value::Null],
            vec![Value::Int(20), Value::Float(4.5), Value::Null],
            vec![Value::Int(38), Value::Float(5.5), Value::Null],
        ]);

        let transposed = table.transpose();
        assert_eq!(transposed.num_columns(), table.num_rows());
        assert_eq!(transposed.num_rows(), table.num_columns());
        assert_eq!(transposed.dtypes(), [Dtype::Float64; 3]);
        assert_eq!(transposed.rows()[0], [Value::Int(15), Value::Int(20), Value::Int(38)]);
    }

    #[tokio::test]
    async fn test_spark_session_reads_staff_through_bridge() {
        use crate::spark::read::ReadType;
        use crate::spark::relation::RelType;

        let session = SparkSession::lazy("sc://localhost:15002");
        let source = JdbcSource::staff("jdbc:rs:dv://mdss:1200");

        let staff = session.load_table(&source).await.unwrap();

        match staff.relation().rel_type.as_ref().unwrap() {
            RelType::Read(read) => match read.read_type.as_ref().unwrap() {
                ReadType::DataSource(data_source) => {
                    let expected: HashMap<String, String> = source
                        .options()
                        .iter()
                        .map(|(key, value)| (key.to_string(), value.to_string()))
                        .collect();

                    assert_eq!(data_source.format.as_deref(), Some("jdbc"));
                    assert_eq!(data_source.options, expected);
                    assert_eq!(data_source.options.len(), 5);
                }
            },
            other => panic!("unexpected relation: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_data_frame_averages_sorted_by_department() {
        use crate::functions::{avg, col};
        use crate::spark;
        use crate::spark::aggregate::GroupType;
        use crate::spark::relation::RelType;

        let session = SparkSession::lazy("sc://localhost:15002");
        let staff = session.load_table(&JdbcSource::staff("jdbc:rs:dv://mdss:1200")).await.unwrap();
        let read = staff.relation().clone();

        let averages = staff.average_by(DEPT_COLUMN, &[YEARS_COLUMN, LAST_NAME_COLUMN]);

        let sort = match averages.relation().rel_type.as_ref().unwrap() {
            RelType::Sort(sort) => sort,
            other => panic!("unexpected relation: {other:?}"),
        };
        assert_eq!(sort.is_global, Some(true));
        assert_eq!(sort.order, vec![col(DEPT_COLUMN).into_sort_order()]);

        let aggregate_relation: &spark::Relation = sort.input.as_ref().unwrap();
        let aggregate = match aggregate_relation.rel_type.as_ref().unwrap() {
            RelType::Aggregate(aggregate) => aggregate,
            other => panic!("unexpected relation: {other:?}"),
        };
        assert_eq!(aggregate.group_type, GroupType::Groupby as i32);
        assert_eq!(aggregate.grouping_expressions, vec![col(DEPT_COLUMN).expression]);
        assert_eq!(aggregate.aggregate_expressions, vec![
            avg(YEARS_COLUMN).expression,
            avg(LAST_NAME_COLUMN).expression,
        ]);

        let input: &spark::Relation = aggregate.input.as_ref().unwrap();
        assert_eq!(*input, read);
    }

    #[test]
    fn test_failed_load_stops_before_printing() {
        let (result, calls, out) = run_with(&["spark-ivp", "jdbc:rs:dv://unreachable:1200"], true);

        let err = result.unwrap_err();
        assert!(err.source_chain_contains("table STAFFVS not found"));
        assert!(out.is_empty());
        assert_eq!(calls.loads.borrow().len(), 1);
        assert_eq!(calls.shutdowns.get(), 0);
    }

    trait SourceChain {
        fn source_chain_contains(&self, needle: &str) -> bool;
    }

    impl SourceChain for SparkError {
        fn source_chain_contains(&self, needle: &str) -> bool {
            let mut current: Option<&dyn std::error::Error> = Some(self);
            while let Some(error) = current {
                if error.to_string().contains(needle) {
                    return true;
                }
                current = error.source();
            }
            false
        }
    }
}
