use anyhow::anyhow;

/// The three coordinate reference systems a run works in: where the input
/// geometries are defined, where the buffer distance is interpreted, and what
/// the output dataset is written in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrsTriple {
    pub source: String,
    pub buffer: String,
    pub destination: String,
}

/// Apply the CRS fall back chain: the source CRS comes from the command line
/// or from the input file, and the buffer and destination CRS default to the
/// source.
pub fn resolve_crs_fallbacks(
    src_crs: Option<&str>,
    buf_crs: Option<&str>,
    dst_crs: Option<&str>,
    file_crs: Option<&str>,
) -> anyhow::Result<CrsTriple> {
    log::debug!("Resolving CRS fall backs");
    let source = match src_crs.or(file_crs) {
        Some(crs) => crs.to_string(),
        None => {
            return Err(anyhow!(
                "CRS is not set in input file. Use --src-crs to specify."
            ))
        }
    };
    let buffer = buf_crs.unwrap_or(&source).to_string();
    let destination = dst_crs.unwrap_or(&source).to_string();
    log::debug!("src_crs={}", source);
    log::debug!("buf_crs={}", buffer);
    log::debug!("dst_crs={}", destination);
    Ok(CrsTriple {
        source,
        buffer,
        destination,
    })
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::resolve_crs_fallbacks;

    #[rstest]
    #[case(None, None, None, Some("EPSG:4326"), "EPSG:4326", "EPSG:4326", "EPSG:4326")]
    #[case(Some("EPSG:4326"), None, None, None, "EPSG:4326", "EPSG:4326", "EPSG:4326")]
    // An explicit source CRS wins over the one declared in the file.
    #[case(Some("EPSG:4326"), None, None, Some("EPSG:25832"), "EPSG:4326", "EPSG:4326", "EPSG:4326")]
    #[case(Some("EPSG:4326"), Some("EPSG:3857"), None, None, "EPSG:4326", "EPSG:3857", "EPSG:4326")]
    #[case(Some("EPSG:4326"), Some("EPSG:3857"), Some("EPSG:32618"), None, "EPSG:4326", "EPSG:3857", "EPSG:32618")]
    fn test_resolve_crs_fallbacks(
        #[case] src_crs: Option<&str>,
        #[case] buf_crs: Option<&str>,
        #[case] dst_crs: Option<&str>,
        #[case] file_crs: Option<&str>,
        #[case] expected_source: &str,
        #[case] expected_buffer: &str,
        #[case] expected_destination: &str,
    ) {
        let triple = resolve_crs_fallbacks(src_crs, buf_crs, dst_crs, file_crs).unwrap();
        assert_eq!(triple.source, expected_source);
        assert_eq!(triple.buffer, expected_buffer);
        assert_eq!(triple.destination, expected_destination);
    }

    #[rstest]
    fn test_missing_crs_everywhere_is_an_error() {
        let result = resolve_crs_fallbacks(None, Some("EPSG:3857"), None, None);
        assert!(result.is_err());
    }
}
