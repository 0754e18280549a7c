//! Lazy relations built on the client and executed by the server.

use crate::client::{ClientError, ClientErrorKind};
use crate::error::SparkError;
use crate::functions::{Column, avg};
use crate::session::SparkSession;
use crate::spark;
use crate::spark::relation::RelType;
use crate::table::LocalTable;

use arrow::array::{RecordBatch, StringArray};
use log::debug;
use std::collections::HashMap;

/// Rows printed by [`DataFrame::show`].
pub const DEFAULT_SHOW_ROWS: i32 = 20;
/// Cell width after which [`DataFrame::show`] truncates values.
pub const DEFAULT_SHOW_TRUNCATE: i32 = 20;

/// Builds a `Read.DataSource` relation, e.g. for the `jdbc` format.
#[derive(Clone, Debug)]
pub struct DataFrameReader {
    session: SparkSession,
    format: Option<String>,
    options: HashMap<String, String>,
}

impl DataFrameReader {
    pub(crate) fn new(session: SparkSession) -> DataFrameReader {
        DataFrameReader { session, format: None, options: HashMap::new() }
    }

    pub fn format(mut self, format: &str) -> Self {
        self.format = Some(format.to_string());
        self
    }

    pub fn option(mut self, key: &str, value: &str) -> Self {
        self.options.insert(key.to_string(), value.to_string());
        self
    }

    pub fn options<I, K, V>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.options.extend(options.into_iter().map(|(key, value)| (key.into(), value.into())));
        self
    }

    /// Returns the loaded DataFrame. Nothing is sent to the server until an
    /// action such as [`DataFrame::show`] or [`DataFrame::collect`] runs.
    pub fn load(self) -> DataFrame {
        use spark::read::{DataSource, ReadType};

        let read = spark::Read {
            read_type: Some(ReadType::DataSource(DataSource {
                format: self.format,
                schema: None,
                options: self.options,
                paths: vec![],
                predicates: vec![],
            })),
            is_streaming: false,
        };

        let relation = self.session.relation(RelType::Read(read.into()));
        DataFrame::new(self.session, relation)
    }
}

#[derive(Clone, Debug)]
pub struct DataFrame {
    session: SparkSession,
    relation: spark::Relation,
}

impl DataFrame {
    pub(crate) fn new(session: SparkSession, relation: spark::Relation) -> DataFrame {
        DataFrame { session, relation }
    }

    #[cfg(test)]
    pub(crate) fn relation(&self) -> &spark::Relation {
        &self.relation
    }

    pub(crate) fn plan(&self) -> spark::Plan {
        spark::Plan { op_type: Some(spark::plan::OpType::Root(self.relation.clone())) }
    }

    pub fn group_by<I, C>(self, columns: I) -> GroupedData
    where
        I: IntoIterator<Item = C>,
        C: Into<Column>,
    {
        GroupedData {
            df: self,
            grouping: columns.into_iter().map(Into::into).collect(),
        }
    }

    /// Global sort. Plain columns sort ascending with nulls first.
    pub fn order_by<I, C>(self, columns: I) -> DataFrame
    where
        I: IntoIterator<Item = C>,
        C: Into<Column>,
    {
        let sort = spark::Sort {
            input: Some(self.relation.into()),
            order: columns.into_iter().map(|column| Into::<Column>::into(column).into_sort_order()).collect(),
            is_global: Some(true),
        };

        let relation = self.session.relation(RelType::Sort(sort.into()));
        DataFrame::new(self.session, relation)
    }

    pub(crate) fn show_string_plan(&self, num_rows: i32, truncate: i32, vertical: bool) -> spark::Plan {
        let show = spark::ShowString {
            input: Some(self.relation.clone().into()),
            num_rows,
            truncate,
            vertical,
        };

        let relation = self.session.relation(RelType::ShowString(show.into()));
        spark::Plan { op_type: Some(spark::plan::OpType::Root(relation)) }
    }

    /// Renders the first `num_rows` rows on the server, the way `show()` prints them.
    ///
    /// `truncate` is the maximum cell width; 0 disables truncation.
    pub async fn show_string(&self, num_rows: i32, truncate: i32, vertical: bool) -> Result<String, SparkError> {
        let plan = self.show_string_plan(num_rows, truncate, vertical);
        let batches = self.session.client().execute(plan).await?;

        Ok(show_string_from_batches(&batches)?)
    }

    /// Prints 20 rows with cells truncated to 20 characters.
    pub async fn show(&self) -> Result<(), SparkError> {
        let rendered = self.show_string(DEFAULT_SHOW_ROWS, DEFAULT_SHOW_TRUNCATE, false).await?;
        println!("{rendered}");
        Ok(())
    }

    pub async fn collect(&self) -> Result<Vec<RecordBatch>, SparkError> {
        let batches = self.session.client().execute(self.plan()).await?;
        debug!("Collected {} rows", batches.iter().map(RecordBatch::num_rows).sum::<usize>());
        Ok(batches)
    }

    /// Collects the DataFrame into a [`LocalTable`] for local formatting.
    pub async fn to_local(&self) -> Result<LocalTable, SparkError> {
        let batches = self.collect().await?;
        LocalTable::from_batches(&batches)
    }
}

pub(crate) fn show_string_from_batches(batches: &[RecordBatch]) -> Result<String, ClientError> {
    let unexpected = |msg: &str| ClientError::new(ClientErrorKind::ShowString(msg.to_string()));

    let batch = batches
        .iter()
        .find(|batch| batch.num_rows() > 0)
        .ok_or_else(|| unexpected("no rows were returned"))?;

    if batch.num_columns() != 1 {
        return Err(unexpected("expected a single column"));
    }

    let column = batch
        .column(0)
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| unexpected("the column is not a string column"))?;

    Ok(column.value(0).to_string())
}

/// A DataFrame waiting for its aggregate expressions.
#[derive(Clone, Debug)]
pub struct GroupedData {
    df: DataFrame,
    grouping: Vec<Column>,
}

impl GroupedData {
    pub fn agg<I, C>(self, expressions: I) -> DataFrame
    where
        I: IntoIterator<Item = C>,
        C: Into<Column>,
    {
        use spark::aggregate::GroupType;

        let aggregate = spark::Aggregate {
            input: Some(self.df.relation.into()),
            group_type: GroupType::Groupby as i32,
            grouping_expressions: self.grouping.into_iter().map(|column| column.expression).collect(),
            aggregate_expressions: expressions.into_iter().map(|column| Into::<Column>::into(column).expression).collect(),
        };

        let relation = self.df.session.relation(RelType::Aggregate(aggregate.into()));
        DataFrame::new(self.df.session, relation)
    }

    /// Averages each column per group.
    pub fn avg<I, C>(self, columns: I) -> DataFrame
    where
        I: IntoIterator<Item = C>,
        C: Into<Column>,
    {
        let expressions: Vec<Column> = columns.into_iter().map(avg).collect();
        self.agg(expressions)
    }
}
