use sitestack::provision::{apply_all, CertificateOutcome, MemoryBackend, Provisioner, StackStatus};
use sitestack::resources::{BUCKET_TYPE, CERTIFICATE_TYPE, DISTRIBUTION_TYPE, RECORD_SET_TYPE};
use sitestack::zone::StaticZones;
use sitestack::{site, Config, Error, SiteStack, Stage};

const SITES: &str = r#"
[[site]]
domain = "theashentree.com"
asset_path = "./website"
spa_routing = false

[[site]]
domain = "raceteamtv.com"
asset_path = "./website"
spa_routing = true
"#;

async fn build() -> Vec<SiteStack> {
    let config = Config::from_toml_str(SITES).unwrap();
    let zones = StaticZones::new()
        .with_zone("theashentree.com.", "/hostedzone/ZASHEN")
        .with_zone("raceteamtv.com.", "/hostedzone/ZRACE");
    site::build_all(&config, &zones).await.unwrap()
}

#[tokio::test]
async fn sites_share_nothing() {
    let sites = build().await;
    assert_eq!(sites.len(), 2);
    let ids = |s: &SiteStack, ty: &str| -> Vec<String> {
        s.template.resources_of_type(ty).map(|(_, r)| r.properties.to_string()).collect()
    };
    for ty in [CERTIFICATE_TYPE, BUCKET_TYPE, DISTRIBUTION_TYPE] {
        assert_eq!(ids(&sites[0], ty).len(), 1);
        assert_eq!(ids(&sites[1], ty).len(), 1);
    }
    assert_ne!(ids(&sites[0], CERTIFICATE_TYPE), ids(&sites[1], CERTIFICATE_TYPE));
    assert_ne!(ids(&sites[0], DISTRIBUTION_TYPE), ids(&sites[1], DISTRIBUTION_TYPE));

    let backend = MemoryBackend::new();
    let outputs = apply_all(&backend, &sites).await.unwrap();
    assert_ne!(outputs[0]["BucketName"], outputs[1]["BucketName"]);
    assert_ne!(outputs[0]["DistributionDomainName"], outputs[1]["DistributionDomainName"]);
    assert_eq!(backend.record_owner("www.theashentree.com.", "A").unwrap().as_deref(), Some("theashentree-com-site"));
    assert_eq!(backend.record_owner("raceteamtv.com.", "AAAA").unwrap().as_deref(), Some("raceteamtv-com-site"));

    // tearing one down leaves the other untouched
    backend.teardown("theashentree-com-site").await.unwrap();
    assert_eq!(backend.status("theashentree-com-site").await.unwrap(), None);
    assert_eq!(backend.status("raceteamtv-com-site").await.unwrap(), Some(StackStatus::Stable));
    assert_eq!(backend.resources("raceteamtv-com-site").unwrap().len(), 12);
}

#[tokio::test]
async fn reapply_is_idempotent() {
    let sites = build().await;
    let backend = MemoryBackend::new();
    let first = apply_all(&backend, &sites).await.unwrap();
    let before = backend.resources("raceteamtv-com-site").unwrap();
    let second = apply_all(&backend, &sites).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(backend.resources("raceteamtv-com-site").unwrap(), before);
}

#[tokio::test]
async fn failed_certificate_stops_only_that_site() {
    let sites = build().await;
    let backend = MemoryBackend::new();
    backend.apply(sites[0].name(), &sites[0].template).await.unwrap();

    let failing = MemoryBackend::new().with_certificate_outcome(CertificateOutcome::Failed("CAA record forbids amazon.com".into()));
    let err = failing.apply(sites[1].name(), &sites[1].template).await.unwrap_err();
    assert!(matches!(err, Error::CertificateValidationFailed { ref domain, .. } if domain == "*.raceteamtv.com"));
    let status = failing.status(sites[1].name()).await.unwrap().unwrap();
    assert_eq!(status.stage(), Stage::CertificatePending);

    assert_eq!(backend.status(sites[0].name()).await.unwrap(), Some(StackStatus::Stable));
}

#[tokio::test]
async fn records_already_claimed_conflict() {
    let sites = build().await;
    let backend = MemoryBackend::new();
    backend.apply(sites[0].name(), &sites[0].template).await.unwrap();
    let err = backend.apply("imposter", &sites[0].template).await.unwrap_err();
    assert!(matches!(err, Error::ResourceConflict { .. }), "{err}");
    assert_eq!(backend.record_owner("theashentree.com.", "A").unwrap().as_deref(), Some("theashentree-com-site"));
}

#[tokio::test]
async fn changed_template_keeps_www_records_and_their_names() {
    let sites = build().await;
    let race = &sites[1];
    let backend = MemoryBackend::new();
    backend.apply(race.name(), &race.template).await.unwrap();
    let before = backend.resources(race.name()).unwrap();

    let without_spa = Config::from_toml_str(r#"
[[site]]
domain = "raceteamtv.com"
asset_path = "./website"
spa_routing = false
"#).unwrap();
    let zones = StaticZones::new().with_zone("raceteamtv.com.", "/hostedzone/ZRACE");
    let changed = site::build_all(&without_spa, &zones).await.unwrap().remove(0);
    assert_eq!(changed.name(), race.name());
    assert_ne!(changed.template, race.template);

    backend.apply(changed.name(), &changed.template).await.unwrap();
    assert_eq!(backend.status(race.name()).await.unwrap(), Some(StackStatus::Stable));
    assert_eq!(backend.resources(race.name()).unwrap(), before);
    for name in ["raceteamtv.com.", "www.raceteamtv.com."] {
        for ty in ["A", "AAAA"] {
            assert_eq!(backend.record_owner(name, ty).unwrap().as_deref(), Some("raceteamtv-com-site"), "{name} {ty}");
        }
    }

    // dropping the www AAAA record releases only that name
    let mut trimmed = changed.template.clone();
    let www_aaaa = trimmed.resources_of_type(RECORD_SET_TYPE)
        .find(|(_, r)| r.properties["Name"] == "www.raceteamtv.com." && r.properties["Type"] == "AAAA")
        .map(|(id, _)| id.clone())
        .unwrap();
    trimmed.resources.remove(&www_aaaa);
    backend.apply(changed.name(), &trimmed).await.unwrap();
    assert_eq!(backend.record_owner("www.raceteamtv.com.", "AAAA").unwrap(), None);
    assert_eq!(backend.record_owner("www.raceteamtv.com.", "A").unwrap().as_deref(), Some("raceteamtv-com-site"));
    assert_eq!(backend.resources(race.name()).unwrap().len(), 11);
}
