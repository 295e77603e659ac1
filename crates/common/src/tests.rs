use super::*;

#[test]
fn config_builder_applies_defaults() {
    let config = Config::builder().build();
    assert_eq!(config.data_dir, PathBuf::from("./db_data"));
    assert_eq!(config.buffer_frames, 64);
    assert_eq!(config.eviction, EvictionPolicy::Lru);
}

#[test]
fn config_round_trips_through_json() {
    let config = Config::builder()
        .data_dir(PathBuf::from("/tmp/x"))
        .buffer_frames(8)
        .eviction(EvictionPolicy::Clock)
        .build();
    let json = serde_json::to_string(&config).unwrap();
    let back: Config = serde_json::from_str(&json).unwrap();
    assert_eq!(back.data_dir, config.data_dir);
    assert_eq!(back.buffer_frames, 8);
    assert_eq!(back.eviction, EvictionPolicy::Clock);
}

#[test]
fn errors_render_their_kind() {
    let err = DbError::NotFound("table 'users'".into());
    assert_eq!(format!("{err}"), "not found: table 'users'");
    let err = DbError::SchemaViolation("bad type".into());
    assert!(format!("{err}").starts_with("schema violation"));
}

#[test]
fn io_errors_convert() {
    fn fails() -> DbResult<()> {
        Err(io::Error::new(io::ErrorKind::Other, "disk gone"))?;
        Ok(())
    }
    assert!(matches!(fails(), Err(DbError::Io(_))));
}
