//! Installation verification program for Spark and a JDBC bridge to VSAM data.
//!
//! The program talks to a Spark cluster over [Spark Connect], loads the
//! `STAFFVS` table through the bridge driver, averages it by department and
//! prints the result twice: once as Spark renders it and once transposed
//! from a local copy.
//!
//! ```no_run
//! use spark_ivp::{col, SparkSessionBuilder};
//!
//! # async fn demo() -> Result<(), spark_ivp::SparkError> {
//! let spark = SparkSessionBuilder::new("sc://localhost:15002")
//!     .app_name("izodaIVP")
//!     .build()
//!     .await?;
//!
//! let staff = spark
//!     .read()
//!     .format("jdbc")
//!     .option("url", "jdbc:rs:dv://mdss.example.com:1200;DSN=VSAM")
//!     .option("dbtable", "STAFFVS")
//!     .load();
//!
//! let averages = staff
//!     .group_by([col("STAFFVS_DATA_DEPT")])
//!     .avg(["STAFFVS_DATA_YRS"])
//!     .order_by(["STAFFVS_DATA_DEPT"]);
//!
//! averages.show().await?;
//! println!("{}", averages.to_local().await?.transpose());
//!
//! spark.stop().await
//! # }
//! ```
//!
//! [Spark Connect]: https://spark.apache.org/docs/latest/spark-connect-overview.html

mod client;
mod dataframe;
mod error;
mod functions;
mod io;
pub mod ivp;
mod session;
mod table;

pub(crate) mod spark {
    tonic::include_proto!("spark.connect");
}

pub use client::ChannelBuilder;
pub use dataframe::{DataFrame, DataFrameReader, GroupedData};
pub use error::SparkError;
pub use functions::{Column, avg, col};
pub use session::{SparkSession, SparkSessionBuilder};
pub use table::{Dtype, LocalTable, Value};
