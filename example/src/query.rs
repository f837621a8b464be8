use std::env::var;

use gelro::{ConnectParams, Connection, QueryArgs, Result, Value};

use crate::transport::TcpTransport;

pub async fn main() -> Result<()> {
    let addr = var("GEL_ADDR").unwrap_or_else(|_| "localhost:5656".into());
    let user = var("GEL_USER").unwrap_or_else(|_| "edgedb".into());
    let database = var("GEL_DATABASE").unwrap_or_else(|_| "main".into());

    let socket = TcpTransport::connect(&addr).await.map_err(gelro::Error::from)?;
    let mut conn = Connection::connect(socket, &ConnectParams::new(user, database)).await?;

    // Scalars

    let row = conn.query_required_single("select 1 + 1", None).await?;
    assert_eq!(row, Value::Int64(2));

    let rows = conn.query("select {1, 2, 3}", None).await?;
    assert_eq!(rows.len(), 3);

    // Arguments

    let args = QueryArgs::Positional(vec![Value::Str("Deez".into())]);
    let row = conn
        .query_required_single("select <str>$0 ++ '!'", Some(&args))
        .await?;
    assert_eq!(row, Value::Str("Deez!".into()));

    // JSON output

    let json = conn.query_json("select {1, 2, 3}", None).await?;
    assert_eq!(json, "[1, 2, 3]");

    // Empty optional

    let row = conn.query_single("select <int64>{}", None).await?;
    assert!(row.is_none());

    conn.close().await?;

    Ok(())
}
