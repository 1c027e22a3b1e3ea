use nhgisapi::{Client, DatasetSelection, MetadataQuery, NhgisExtract, list_entries, read_geography, read_table};
use std::path::Path;

fn main() -> nhgisapi::Result<()> {
    // Example program that calls the library API.
    // Configure authentication via IPUMS_API_KEY or a `.ipumsrc` file.
    let client = Client::from_env()?;

    let tables = client.metadata(&MetadataQuery::new().with_dataset("2010_SF1a").with_data_table("P1"))?;
    println!("P1: {}", tables["description"]);

    let mut extract = NhgisExtract::new()
        .with_dataset("2010_SF1a", DatasetSelection::new(["P1"], ["state"]))
        .with_shapefiles(["us_state_2010_tl2010"])
        .with_description("2010 population by state");

    let files = client.retrieve(&mut extract, Some(Path::new(".")))?;
    for file in &files {
        for entry in list_entries(file, None)? {
            println!("{}: {}", file.display(), entry);
        }
    }

    let table = read_table(&files[0], Some(r"\.csv$"))?;
    println!("{} states, columns: {:?}", table.len(), table.headers());

    if let Some(gis) = files.get(1) {
        let states = read_geography(gis, Some("us_state_2010"))?;
        println!("{} state boundaries ({:?})", states.len(), states.shape_type);
    }
    Ok(())
}
