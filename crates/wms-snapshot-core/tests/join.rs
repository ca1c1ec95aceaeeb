use polars::prelude::*;
use wms_snapshot_core::join::{join_positions, JoinError, JoinSide};

fn warehouse() -> PolarsResult<DataFrame> {
    df!(
        "posicion" => [5i64, 7, 9],
        "lote" => ["007", "A12", "0009"],
        "sensible" => [Some(0i64), Some(1), None],
    )
}

fn positions() -> PolarsResult<DataFrame> {
    df!(
        "posicion" => [7i64, 11],
        "pos_sensible" => [1i64, 0],
        "pos_pulmon" => [0i64, 1],
    )
}

#[test]
fn every_warehouse_row_survives_exactly_once() -> anyhow::Result<()> {
    let outcome = join_positions(&warehouse()?, &positions()?)?;
    let joined = outcome
        .frame
        .sort(["posicion"], SortMultipleOptions::default())?;

    assert_eq!(joined.height(), 3);
    assert_eq!(outcome.unmatched_rows, 2);

    let positions: Vec<Option<i64>> = joined.column("posicion")?.i64()?.into_iter().collect();
    assert_eq!(positions, vec![Some(5), Some(7), Some(9)]);

    let lots: Vec<Option<&str>> = joined.column("lote")?.str()?.into_iter().collect();
    assert_eq!(lots, vec![Some("007"), Some("A12"), Some("0009")]);

    let sensible: Vec<Option<i64>> = joined.column("sensible")?.i64()?.into_iter().collect();
    assert_eq!(sensible, vec![Some(0), Some(1), None]);
    Ok(())
}

#[test]
fn unmatched_position_gets_null_attributes() -> anyhow::Result<()> {
    let warehouse = df!(
        "posicion" => [5i64],
        "lote" => ["L1"],
    )?;

    let outcome = join_positions(&warehouse, &positions()?)?;

    assert_eq!(outcome.frame.height(), 1);
    assert_eq!(outcome.unmatched_rows, 1);
    assert_eq!(outcome.frame.column("posicion")?.i64()?.get(0), Some(5));
    assert_eq!(outcome.frame.column("pos_sensible")?.null_count(), 1);
    assert_eq!(outcome.frame.column("pos_pulmon")?.null_count(), 1);
    Ok(())
}

#[test]
fn matched_position_carries_prefixed_attributes() -> anyhow::Result<()> {
    let outcome = join_positions(&warehouse()?, &positions()?)?;
    let matched = outcome
        .frame
        .filter(&outcome.frame.column("posicion")?.i64()?.equal(7))?;

    assert_eq!(matched.height(), 1);
    assert_eq!(matched.column("pos_sensible")?.i64()?.get(0), Some(1));
    assert_eq!(matched.column("sensible")?.i64()?.get(0), Some(1));
    assert!(matched.column("__position_matched").is_err());
    Ok(())
}

#[test]
fn missing_key_is_reported_per_side() -> anyhow::Result<()> {
    let no_key = df!("lote" => ["L1"])?;

    match join_positions(&no_key, &positions()?) {
        Err(JoinError::MissingKey { side }) => assert_eq!(side, JoinSide::Warehouse),
        other => panic!("expected missing key, got {other:?}"),
    }
    match join_positions(&warehouse()?, &no_key) {
        Err(JoinError::MissingKey { side }) => assert_eq!(side, JoinSide::PositionAttributes),
        other => panic!("expected missing key, got {other:?}"),
    }
    Ok(())
}

#[test]
fn repeated_positions_are_rejected() -> anyhow::Result<()> {
    let repeated = df!(
        "posicion" => [7i64, 7],
        "pos_pulmon" => [0i64, 1],
    )?;

    assert!(matches!(
        join_positions(&warehouse()?, &repeated),
        Err(JoinError::AmbiguousPosition { duplicates: 1 })
    ));
    Ok(())
}

#[test]
fn colliding_attribute_names_are_rejected() -> anyhow::Result<()> {
    let colliding = df!(
        "posicion" => [7i64],
        "sensible" => [1i64],
    )?;

    assert!(matches!(
        join_positions(&warehouse()?, &colliding),
        Err(JoinError::ColumnCollision(name)) if name == "sensible"
    ));
    Ok(())
}
