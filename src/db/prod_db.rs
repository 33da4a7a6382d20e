use crate::db::simem::public_data_archive::SimemArchive;

pub struct ProdDb {}

impl ProdDb {
    pub fn simem_public_data() -> SimemArchive {
        SimemArchive {
            base_dir: "data/simem".to_string(),
        }
    }
}
