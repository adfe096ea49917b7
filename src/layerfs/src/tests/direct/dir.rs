use std::{collections::HashMap, fs, io, os::unix::fs::PermissionsExt};

use crate::{
    data_source::{DataSource, DirStream},
    dir::{Dir, DirEntry},
    error::LayerError,
};

use super::helper;

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[test]
fn test_readdir_basic() -> io::Result<()> {
    let temp_dir = helper::setup_test_layer(&[
        ("a", false, 0o644),
        ("b", false, 0o644),
        ("c", true, 0o755),
        ("c/nested", false, 0o644),
    ])?;

    let layer = helper::load_layer(temp_dir.path())?;
    let mut dir = layer.opendir(c".")?;

    let mut seen = HashMap::new();
    while let Some(entry) = dir.next_entry()? {
        *seen.entry(entry.name).or_insert(0) += 1;
    }

    // The stream stays at its end
    assert!(dir.next_entry()?.is_none());

    seen.remove(&b".".to_vec());
    seen.remove(&b"..".to_vec());

    let mut names: Vec<_> = seen.iter().map(|(name, count)| (name.clone(), *count)).collect();
    names.sort();
    assert_eq!(
        names,
        vec![(b"a".to_vec(), 1), (b"b".to_vec(), 1), (b"c".to_vec(), 1)]
    );

    layer.closedir(dir)?;

    Ok(())
}

#[test]
fn test_readdir_subdirectory() -> io::Result<()> {
    let temp_dir = helper::setup_test_layer(&[
        ("dir1", true, 0o755),
        ("dir1/file1", false, 0o644),
        ("dir1/dir2", true, 0o755),
        ("other", false, 0o644),
    ])?;

    let layer = helper::load_layer(temp_dir.path())?;
    let mut dir = layer.opendir(c"dir1")?;

    let mut entries: Vec<DirEntry> = Vec::new();
    while let Some(entry) = dir.next_entry()? {
        if entry.name != b"." && entry.name != b".." {
            entries.push(entry);
        }
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));

    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].name, b"dir2");
    assert_eq!(entries[1].name, b"file1");

    // Some filesystems don't report entry types
    assert!(matches!(entries[0].type_, libc::DT_DIR | libc::DT_UNKNOWN));
    assert!(matches!(entries[1].type_, libc::DT_REG | libc::DT_UNKNOWN));

    let st = layer.statat(c"dir1/file1", libc::AT_SYMLINK_NOFOLLOW, Default::default())?;
    assert_eq!(entries[1].ino, st.ino);

    dir.close()?;

    Ok(())
}

#[test]
fn test_readdir_empty_directory() -> io::Result<()> {
    let temp_dir = helper::setup_test_layer(&[("empty", true, 0o755)])?;

    let layer = helper::load_layer(temp_dir.path())?;
    let mut dir = layer.opendir(c"empty")?;

    let mut names = Vec::new();
    while let Some(entry) = dir.next_entry()? {
        names.push(entry.name);
    }
    names.sort();
    assert_eq!(names, vec![b".".to_vec(), b"..".to_vec()]);

    Ok(())
}

#[test]
fn test_opendir_errors() -> io::Result<()> {
    let temp_dir = helper::setup_test_layer(&[("file1", false, 0o644)])?;
    let layer = helper::load_layer(temp_dir.path())?;

    match layer.opendir(c"file1") {
        Err(LayerError::NotADirectory) => {}
        Err(e) => panic!("expected NotADirectory, got {:?}", e),
        Ok(_) => panic!("expected NotADirectory"),
    }

    match layer.opendir(c"missing") {
        Err(LayerError::NotFound) => {}
        Err(e) => panic!("expected NotFound, got {:?}", e),
        Ok(_) => panic!("expected NotFound"),
    }

    Ok(())
}

#[test]
fn test_opendir_permission_denied() -> io::Result<()> {
    let temp_dir = helper::setup_test_layer(&[("locked", true, 0o000)])?;
    fs::set_permissions(temp_dir.path(), fs::Permissions::from_mode(0o755))?;
    let layer = helper::load_layer(temp_dir.path())?;

    let res = helper::as_unprivileged(|| layer.opendir(c"locked").map(|_| ()));

    // Let the temporary directory be cleaned up
    fs::set_permissions(
        temp_dir.path().join("locked"),
        fs::Permissions::from_mode(0o755),
    )?;

    match res {
        None => {}
        Some(Err(LayerError::PermissionDenied)) => {}
        Some(Err(e)) => panic!("expected PermissionDenied, got {:?}", e),
        Some(Ok(_)) => panic!("expected PermissionDenied"),
    }

    Ok(())
}

#[test]
fn test_dir_stream_moves_across_threads() -> io::Result<()> {
    let temp_dir = helper::setup_test_layer(&[("a", false, 0o644)])?;
    let layer = helper::load_layer(temp_dir.path())?;

    let file = layer.openat(c".", libc::O_RDONLY | libc::O_DIRECTORY, 0)?;
    let mut dir = Dir::from_file(file)?;

    let count = std::thread::spawn(move || -> io::Result<usize> {
        let mut count = 0;
        while dir.next_entry()?.is_some() {
            count += 1;
        }
        Ok(count)
    })
    .join()
    .unwrap()?;

    // a, . and ..
    assert_eq!(count, 3);

    Ok(())
}

#[test]
fn test_boxed_stream_moves_across_threads() -> io::Result<()> {
    let temp_dir = helper::setup_test_layer(&[("a", false, 0o644), ("b", true, 0o755)])?;
    let layer = helper::load_layer(temp_dir.path())?;

    let mut stream: Box<dyn DirStream> = layer.opendir(c".")?;

    let stream = std::thread::spawn(move || -> io::Result<_> {
        let mut names = Vec::new();
        while let Some(entry) = stream.next_entry()? {
            names.push(entry.name);
        }
        Ok((stream, names))
    })
    .join()
    .unwrap()?;

    let (stream, mut names) = stream;
    names.sort();
    assert_eq!(names, [&b"."[..], b"..", b"a", b"b"]);

    layer.closedir(stream)?;

    Ok(())
}
