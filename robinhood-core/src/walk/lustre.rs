//! The Lustre enricher: contributes `fid`, `hsm_state`, `layout`, and
//! `mdt` inode-xattr keys (spec §4.5, §4.9) by going through a small
//! [LustreOps] seam rather than linking `liblustreapi` directly, so the
//! enricher is unit-testable off real Lustre hardware.

use crate::error::{Error, Result};
use crate::fsevent::{FsEvent, PendingEvent, XattrOp};
use crate::sstack::Sstack;
use crate::value::Value;
use crate::walk::enrich::Enricher;
use tonic::async_trait;

pub const NAME: &str = "lustre";

/// The four fields this enricher can contribute, mirroring the Lustre
/// `liblustreapi` calls the real implementation would wrap.
#[derive(Debug, Clone, Default)]
pub struct LustreInfo {
    pub fid: Option<String>,
    pub hsm_state: Option<String>,
    pub layout: Option<String>,
    pub mdt: Option<String>,
}

/// Abstracts the Lustre-specific lookups. A real implementation resolves
/// these via `liblustreapi` against the file handle baked into [crate::id::Id];
/// off Lustre, backends simply never register this enricher.
pub trait LustreOps: Send + Sync {
    fn lookup(&self, id: &crate::id::Id) -> Result<LustreInfo>;
}

/// Always reports not-supported; the default for non-Lustre deployments.
pub struct UnsupportedLustreOps;

impl LustreOps for UnsupportedLustreOps {
    fn lookup(&self, _id: &crate::id::Id) -> Result<LustreInfo> {
        Err(Error::NotSupported("lustre enrichment".to_string()))
    }
}

pub struct LustreEnricher<O: LustreOps> {
    ops: O,
}

impl<O: LustreOps> LustreEnricher<O> {
    pub fn new(ops: O) -> Self {
        LustreEnricher { ops }
    }
}

#[async_trait]
impl<O: LustreOps> Enricher for LustreEnricher<O> {
    fn name(&self) -> &'static str {
        NAME
    }

    fn max_pairs(&self) -> usize {
        4
    }

    async fn enrich(&self, pending: &mut PendingEvent, scratch: &mut Sstack) -> Result<()> {
        if !pending.hints.extensions.iter().any(|e| e == NAME) {
            return Ok(());
        }
        let id = pending.event.id().clone();
        let info = self.ops.lookup(&id)?;

        let xattrs = match &mut pending.event {
            FsEvent::Xattr {
                inode_xattrs: Some(m),
                ..
            } => m,
            FsEvent::Xattr { inode_xattrs, .. } => inode_xattrs.get_or_insert_with(Default::default),
            _ => {
                pending.hints.extensions.retain(|e| e != NAME);
                return Ok(());
            }
        };

        if let Some(fid) = info.fid {
            let _ = scratch.strdup(&fid);
            xattrs.insert("fid".to_string(), XattrOp::Set(Value::String(fid)));
        }
        if let Some(state) = info.hsm_state {
            xattrs.insert("hsm_state".to_string(), XattrOp::Set(Value::String(state)));
        }
        if let Some(layout) = info.layout {
            xattrs.insert("layout".to_string(), XattrOp::Set(Value::String(layout)));
        }
        if let Some(mdt) = info.mdt {
            xattrs.insert("mdt".to_string(), XattrOp::Set(Value::String(mdt)));
        }

        pending.hints.extensions.retain(|e| e != NAME);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsevent::EnrichHints;
    use crate::id::{BackendTag, Id};

    struct FakeLustre;
    impl LustreOps for FakeLustre {
        fn lookup(&self, _id: &Id) -> Result<LustreInfo> {
            Ok(LustreInfo {
                fid: Some("0x200000400:0x1:0x0".to_string()),
                hsm_state: Some("archived".to_string()),
                layout: None,
                mdt: Some("MDT0000".to_string()),
            })
        }
    }

    #[tokio::test]
    async fn enriches_xattr_event_with_lustre_fields() {
        let id = Id::new(BackendTag::Lustre, b"h".to_vec());
        let mut pending = PendingEvent {
            event: FsEvent::Xattr {
                id,
                inode_xattrs: None,
                ns: None,
            },
            hints: EnrichHints {
                extensions: vec![NAME.to_string()],
                ..Default::default()
            },
        };
        let mut scratch = Sstack::default();
        let enricher = LustreEnricher::new(FakeLustre);
        enricher.enrich(&mut pending, &mut scratch).await.unwrap();

        match &pending.event {
            FsEvent::Xattr {
                inode_xattrs: Some(m),
                ..
            } => {
                assert_eq!(
                    m.get("hsm_state").unwrap(),
                    &XattrOp::Set(Value::String("archived".to_string()))
                );
                assert_eq!(
                    m.get("mdt").unwrap(),
                    &XattrOp::Set(Value::String("MDT0000".to_string()))
                );
            }
            _ => panic!("expected xattr event"),
        }
        assert!(pending.hints.extensions.is_empty());
    }
}
