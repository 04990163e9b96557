use std::fs;
use std::path::Path;

use bioimageio_spec::file::OfflineFetcher;
use bioimageio_spec::{
    RequestedVersion, Root, ValidationContext, get_package_content, load_description,
    write_package,
};
use indoc::indoc;
use zip::ZipArchive;

const DATASET: &str = indoc! {"
    type: dataset
    format_version: 0.2.4
    name: nuclei
    description: annotated nuclei
    documentation: README.md
    covers: [cover.png, images/cover.png]
    attachments:
      files: [tables/counts.csv]
"};

fn ctx() -> ValidationContext {
    ValidationContext::default().with_log_warnings(false)
}

fn write_resource(dir: &Path) {
    fs::create_dir_all(dir.join("images")).unwrap();
    fs::create_dir_all(dir.join("tables")).unwrap();
    fs::write(dir.join("rdf.yaml"), DATASET).unwrap();
    fs::write(dir.join("README.md"), "# nuclei\n").unwrap();
    fs::write(dir.join("cover.png"), b"first cover").unwrap();
    fs::write(dir.join("images").join("cover.png"), b"second cover").unwrap();
    fs::write(dir.join("tables").join("counts.csv"), "id,count\n1,3\n").unwrap();
}

fn archive_names(path: &Path) -> Vec<String> {
    let archive = ZipArchive::new(fs::File::open(path).unwrap()).unwrap();
    archive.file_names().map(str::to_string).collect()
}

#[test]
fn packaged_resource_validates_from_the_archive() {
    let dir = tempfile::tempdir().unwrap();
    write_resource(dir.path());

    let loaded = load_description(dir.path(), &ctx(), &RequestedVersion::Discover).unwrap();
    assert!(loaded.passed(), "{}", loaded.validation_summary());
    let descr = loaded.into_resource().unwrap();

    let out = dir.path().join("dist").join("nuclei.zip");
    let written = write_package(&descr, &out, &OfflineFetcher).unwrap();
    assert_eq!(written, out);

    let mut names = archive_names(&out);
    names.sort();
    assert_eq!(
        names,
        ["README.md", "counts.csv", "cover.png", "cover_2.png", "rdf.yaml"]
    );

    let repacked = load_description(&out, &ctx(), &RequestedVersion::Discover).unwrap();
    assert!(repacked.passed(), "{}", repacked.validation_summary());
    let repacked = repacked.into_resource().unwrap();
    assert_eq!(repacked.root(), &Root::Zip(out.clone()));
    assert_eq!(
        repacked.content()["covers"],
        serde_json::json!(["cover.png", "cover_2.png"])
    );
}

#[test]
fn packaging_twice_is_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    write_resource(dir.path());
    let descr = load_description(dir.path(), &ctx(), &RequestedVersion::Discover)
        .unwrap()
        .into_resource()
        .unwrap();

    let first = write_package(&descr, &dir.path().join("a.zip"), &OfflineFetcher).unwrap();
    let second = write_package(&descr, &dir.path().join("b.zip"), &OfflineFetcher).unwrap();
    assert_eq!(fs::read(first).unwrap(), fs::read(second).unwrap());
}

#[test]
fn package_manifest_ends_with_the_document() {
    let dir = tempfile::tempdir().unwrap();
    write_resource(dir.path());
    let descr = load_description(dir.path(), &ctx(), &RequestedVersion::Discover)
        .unwrap()
        .into_resource()
        .unwrap();

    let content = get_package_content(&descr).unwrap();
    assert_eq!(content.names().last(), Some("rdf.yaml"));
    let document = content.document().unwrap();
    assert_eq!(document["attachments"]["files"][0], "counts.csv");
    assert_eq!(document["documentation"], "README.md");
}
