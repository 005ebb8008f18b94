/*
 * Copyright 2025 OpenStudioLandscapes Contributors
 */

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Result};
use slog::{info, Logger};

#[derive(Debug, Clone, PartialEq)]
pub enum Hash {
    Sha256(String),
    Md5(String),
}

impl Hash {
    /**
     * Parse "sha256:<hex>" or "md5:<hex>".
     */
    pub fn parse(s: &str) -> Result<Hash> {
        let (algo, hex) = match s.trim().split_once(':') {
            Some(t) => t,
            None => bail!("hash {:?} should be ALGORITHM:HEX", s),
        };

        let hex = hex.to_ascii_lowercase();
        let (h, len) = match algo {
            "sha256" => (Hash::Sha256(hex.clone()), 64),
            "md5" => (Hash::Md5(hex.clone()), 32),
            n => bail!("unsupported hash algorithm {:?}", n),
        };

        if hex.len() != len || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            bail!("hash {:?} is not {} hex digits", s, len);
        }

        Ok(h)
    }

    fn expected(&self) -> &str {
        match self {
            Hash::Sha256(h) | Hash::Md5(h) => h,
        }
    }
}

fn hash_file(h: &Hash, path: &Path) -> Result<String> {
    let mut r = BufReader::new(File::open(path)?);
    let mut buf = vec![0u8; 64 * 1024];

    match h {
        Hash::Sha256(_) => {
            use sha2::Digest;

            let mut d = sha2::Sha256::new();
            loop {
                let n = r.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                d.update(&buf[..n]);
            }
            Ok(hex::encode(d.finalize()))
        }
        Hash::Md5(_) => {
            use digest::Digest;

            let mut d = md5::Md5::new();
            loop {
                let n = r.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                d.input(&buf[..n]);
            }
            Ok(hex::encode(d.result()))
        }
    }
}

pub fn verify(log: &Logger, path: &Path, h: &Hash) -> Result<()> {
    let actual = hash_file(h, path)?;
    if actual != h.expected() {
        bail!("{}: hash mismatch: expected {}, got {}",
            path.display(), h.expected(), actual);
    }

    info!(log, "{} hash ok ({})", path.display(), actual);
    Ok(())
}

/**
 * Download a URL into a file.  The file is written under a temporary name and
 * only renamed into place once the whole body has arrived.
 */
pub fn download(log: &Logger, url: &str, dst: &Path) -> Result<()> {
    info!(log, "downloading {} -> {} ...", url, dst.display());

    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(3600))
        .build()?;
    let mut res = client.get(url).send()?;
    if !res.status().is_success() {
        bail!("download {}: status {}", url, res.status());
    }

    let parent = match dst.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let tmp = tempfile::NamedTempFile::new_in(parent)?;
    let mut w = BufWriter::new(tmp);
    let n = res.copy_to(&mut w)?;
    w.flush()?;
    let tmp = match w.into_inner() {
        Ok(tmp) => tmp,
        Err(e) => bail!("flushing download of {}: {}", url, e.error()),
    };
    tmp.persist(dst)?;

    info!(log, "downloaded {} bytes", n);
    Ok(())
}

/**
 * Unpack a gzip-compressed tar archive into a directory.
 */
pub fn unpack(log: &Logger, archive: &Path, dir: &Path) -> Result<()> {
    info!(log, "unpacking {} -> {} ...", archive.display(), dir.display());

    let f = File::open(archive)?;
    let gz = flate2::read::GzDecoder::new(BufReader::new(f));
    let mut tar = tar::Archive::new(gz);
    tar.set_preserve_permissions(true);
    tar.unpack(dir)?;

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn log() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    #[test]
    fn parse_hashes() {
        let sha = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
        assert_eq!(Hash::parse(&format!("sha256:{}", sha)).unwrap(),
            Hash::Sha256(sha.to_string()));
        assert_eq!(
            Hash::parse("md5:D41D8CD98F00B204E9800998ECF8427E").unwrap(),
            Hash::Md5("d41d8cd98f00b204e9800998ecf8427e".to_string())
        );
        assert!(Hash::parse("sha1:abcd").is_err());
        assert!(Hash::parse("md5:abcd").is_err());
        assert!(Hash::parse("e3b0c442").is_err());
    }

    #[test]
    fn verify_digests() {
        let dir = tempfile::tempdir().unwrap();
        let f = dir.path().join("empty");
        std::fs::write(&f, "").unwrap();

        let sha = Hash::parse("sha256:e3b0c44298fc1c149afbf4c8996fb924\
            27ae41e4649b934ca495991b7852b855").unwrap();
        let md5 = Hash::parse("md5:d41d8cd98f00b204e9800998ecf8427e").unwrap();
        verify(&log(), &f, &sha).unwrap();
        verify(&log(), &f, &md5).unwrap();

        std::fs::write(&f, "x").unwrap();
        let e = verify(&log(), &f, &md5).unwrap_err();
        assert!(e.to_string().contains("mismatch"));
    }

    #[test]
    fn unpack_tarball() {
        let dir = tempfile::tempdir().unwrap();
        let tgz = dir.path().join("Python-3.11.11.tgz");

        {
            let f = File::create(&tgz).unwrap();
            let gz = flate2::write::GzEncoder::new(f,
                flate2::Compression::default());
            let mut b = tar::Builder::new(gz);
            let data = b"#!/bin/sh\necho configured\n";
            let mut h = tar::Header::new_gnu();
            h.set_size(data.len() as u64);
            h.set_mode(0o755);
            h.set_cksum();
            b.append_data(&mut h, "Python-3.11.11/configure", &data[..])
                .unwrap();
            b.into_inner().unwrap().finish().unwrap();
        }

        let out = dir.path().join("src");
        std::fs::create_dir(&out).unwrap();
        unpack(&log(), &tgz, &out).unwrap();

        let configure = out.join("Python-3.11.11").join("configure");
        assert_eq!(std::fs::read_to_string(&configure).unwrap(),
            "#!/bin/sh\necho configured\n");
    }

    #[test]
    fn download_from_local_server() {
        let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
        let url = format!("http://{}/Python-3.11.11.tgz", server.server_addr());
        let hdl = std::thread::spawn(move || {
            let req = server.recv().unwrap();
            req.respond(tiny_http::Response::from_data(b"tarball".to_vec()))
                .unwrap();
        });

        let dir = tempfile::tempdir().unwrap();
        let dst = dir.path().join("Python-3.11.11.tgz");
        download(&log(), &url, &dst).unwrap();
        hdl.join().unwrap();

        assert_eq!(std::fs::read(&dst).unwrap(), b"tarball");
    }
}
