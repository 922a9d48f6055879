use std::path::{Path, PathBuf};
use std::sync::Arc;

use ndarray::{Array, Array1, Array2, Array3, Dimension};
use serde_json::json;

use calcium_core::io::archive::ArchiveWriter;
use calcium_core::io::npy::NpyElement;
use calcium_core::io::npy_writer::write_npy;
use calcium_core::keys::{ScanKey, TaskKey};
use calcium_core::params::ProcessingMethod;
use calcium_core::paths::DataRoots;
use calcium_core::pipeline::PipelineContext;
use calcium_core::scan::{FieldGeometry, ScanCatalog, ScanMetadata};
use calcium_core::store::{Catalog, MemoryStore};

pub const SCAN_DIR: &str = "subject1/session1/scan1";

/// Shape of one synthetic suite2p plane.
#[derive(Clone, Debug)]
pub struct PlaneSpec {
    pub frames: usize,
    pub height: usize,
    pub width: usize,
    pub masks: usize,
    /// The first `cells` masks are flagged as cells.
    pub cells: usize,
    /// `(block_size, nblocks)` for non-rigid registration.
    pub nonrigid: Option<([usize; 2], [usize; 2])>,
}

impl PlaneSpec {
    pub fn new(masks: usize, cells: usize) -> Self {
        Self {
            frames: 20,
            height: 16,
            width: 16,
            masks,
            cells,
            nonrigid: None,
        }
    }

    pub fn with_blocks(mut self, block_size: [usize; 2], nblocks: [usize; 2]) -> Self {
        self.nonrigid = Some((block_size, nblocks));
        self
    }
}

/// Deterministic `(rows, cols)` series that differs per plane and row.
pub fn series(rows: usize, cols: usize, seed: usize) -> Array2<f32> {
    Array2::from_shape_fn((rows, cols), |(r, c)| {
        ((seed * 7 + r * 3 + c) % 11) as f32 * 0.5 + seed as f32
    })
}

pub fn image(height: usize, width: usize, seed: usize) -> Array2<f32> {
    Array2::from_shape_fn((height, width), |(y, x)| (y * width + x + seed) as f32)
}

/// Write `planeN/` with ops, stats and every array suite2p produces.
pub fn write_suite2p_plane(root: &Path, plane: usize, spec: &PlaneSpec) -> PathBuf {
    let dir = root.join(format!("plane{plane}"));
    std::fs::create_dir_all(&dir).unwrap();

    let mut ops = json!({
        "nframes": spec.frames,
        "Ly": spec.height,
        "Lx": spec.width,
        "align_by_chan": 1,
        "functional_chan": 1,
        "nonrigid": spec.nonrigid.is_some(),
    });
    if let Some((block_size, nblocks)) = spec.nonrigid {
        let mut yblock = Vec::new();
        let mut xblock = Vec::new();
        for by in 0..nblocks[0] {
            for bx in 0..nblocks[1] {
                let y0 = by * block_size[0] / 2;
                let x0 = bx * block_size[1] / 2;
                yblock.push([y0, y0 + block_size[0]]);
                xblock.push([x0, x0 + block_size[1]]);
            }
        }
        ops["block_size"] = json!(block_size);
        ops["nblocks"] = json!(nblocks);
        ops["yblock"] = json!(yblock);
        ops["xblock"] = json!(xblock);

        let n_blocks = nblocks[0] * nblocks[1];
        write_npy(&dir.join("yoff1.npy"), &series(spec.frames, n_blocks, plane + 1)).unwrap();
        write_npy(&dir.join("xoff1.npy"), &series(spec.frames, n_blocks, plane + 2)).unwrap();
    }
    std::fs::write(dir.join("ops.json"), ops.to_string()).unwrap();

    let stat: Vec<_> = (0..spec.masks)
        .map(|m| {
            json!({
                "ypix": [m, m, m + 1],
                "xpix": [plane, plane + 1, plane],
                "lam": [1.0, 0.5, 0.25],
                "med": [m as f64, plane as f64],
                "npix": 3,
            })
        })
        .collect();
    std::fs::write(dir.join("stat.json"), json!(stat).to_string()).unwrap();

    let iscell = Array2::from_shape_fn((spec.masks, 2), |(m, col)| match (m < spec.cells, col) {
        (true, 0) => 1.0f32,
        (true, _) => 0.9,
        (false, 0) => 0.0,
        (false, _) => 0.1,
    });
    write_npy(&dir.join("iscell.npy"), &iscell).unwrap();

    let rigid = series(2, spec.frames, plane);
    write_npy(&dir.join("yoff.npy"), &rigid.row(0)).unwrap();
    write_npy(&dir.join("xoff.npy"), &rigid.row(1)).unwrap();
    let bad = Array1::from_shape_fn(spec.frames, |f| f == plane);
    write_npy(&dir.join("badframes.npy"), &bad).unwrap();

    write_npy(&dir.join("refImg.npy"), &image(spec.height, spec.width, plane)).unwrap();
    write_npy(&dir.join("meanImg.npy"), &image(spec.height, spec.width, plane + 1)).unwrap();
    write_npy(&dir.join("Vcorr.npy"), &image(spec.height, spec.width, plane + 2)).unwrap();

    write_npy(&dir.join("F.npy"), &series(spec.masks, spec.frames, plane + 10)).unwrap();
    write_npy(&dir.join("Fneu.npy"), &series(spec.masks, spec.frames, plane + 20)).unwrap();
    write_npy(&dir.join("spks.npy"), &series(spec.masks, spec.frames, plane + 30)).unwrap();
    dir
}

pub fn write_suite2p_output(root: &Path, planes: &[PlaneSpec]) -> PathBuf {
    std::fs::create_dir_all(root).unwrap();
    for (idx, spec) in planes.iter().enumerate() {
        write_suite2p_plane(root, idx, spec);
    }
    root.to_path_buf()
}

/// Shape of one synthetic CaImAn archive.
#[derive(Clone, Debug)]
pub struct CaimanSpec {
    pub frames: usize,
    pub dims: Vec<usize>,
    pub components: usize,
    pub pw_rigid: bool,
    /// Write 2-D summary images even for volumetric runs.
    pub planar_images: bool,
}

impl CaimanSpec {
    pub fn planar(components: usize) -> Self {
        Self {
            frames: 20,
            dims: vec![12, 10],
            components,
            pw_rigid: false,
            planar_images: false,
        }
    }
}

fn add_member<T, D>(writer: &mut ArchiveWriter, skip: &[&str], name: &str, array: &Array<T, D>)
where
    T: NpyElement,
    D: Dimension,
{
    if !skip.contains(&name) {
        writer.add_array(name, array).unwrap();
    }
}

/// Write a CaImAn-shaped archive. Every component covers three pixels;
/// `skip` leaves out the named members.
pub fn write_caiman_archive(path: &Path, spec: &CaimanSpec, skip: &[&str]) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut writer = ArchiveWriter::create(path).unwrap();

    let is_3d = spec.dims.len() == 3;
    let (d1, d2) = (spec.dims[0], spec.dims[1]);
    let depth = spec.dims.get(2).copied().unwrap_or(1);
    let pixels = d1 * d2 * depth;

    let mut data = Vec::new();
    let mut indices = Vec::new();
    let mut indptr = vec![0i64];
    for comp in 0..spec.components {
        for (offset, weight) in [(0usize, 1.0f32), (1, 1.0), (2, 2.0)] {
            // Fortran order: x varies fastest.
            let x = (comp + offset) % d1;
            let y = comp % d2;
            indices.push((x + y * d1) as i64);
            data.push(weight);
        }
        indptr.push(data.len() as i64);
    }

    let w = &mut writer;
    add_member(w, skip, "estimates/A/data", &Array1::from(data));
    add_member(w, skip, "estimates/A/indices", &Array1::from(indices));
    add_member(w, skip, "estimates/A/indptr", &Array1::from(indptr));
    add_member(
        w,
        skip,
        "estimates/A/shape",
        &Array1::from(vec![pixels as u64, spec.components as u64]),
    );
    let dims: Vec<u64> = spec.dims.iter().map(|&d| d as u64).collect();
    add_member(w, skip, "dims", &Array1::from(dims));
    add_member(w, skip, "params/motion/is3D", &Array1::from(vec![is_3d]));
    add_member(w, skip, "params/motion/pw_rigid", &Array1::from(vec![spec.pw_rigid]));
    add_member(w, skip, "params/motion/strides", &Array1::from(vec![4u64, 4, 1]));
    add_member(w, skip, "params/motion/overlaps", &Array1::from(vec![2u64, 2, 0]));
    let accepted: Vec<i64> = (0..spec.components as i64).step_by(2).collect();
    add_member(w, skip, "estimates/idx_components", &Array1::from(accepted));

    for name in [
        "motion_correction/reference_image",
        "motion_correction/correlation_image",
        "motion_correction/average_image",
        "motion_correction/max_image",
    ] {
        if is_3d && !spec.planar_images {
            let volume = Array3::from_shape_fn((d1, d2, depth), |(y, x, z)| (y + x + z) as f32);
            add_member(w, skip, name, &volume);
        } else {
            add_member(w, skip, name, &image(d1, d2, 0));
        }
    }

    let dims_count = if is_3d { 3 } else { 2 };
    add_member(
        w,
        skip,
        "motion_correction/shifts_rig",
        &series(spec.frames, dims_count, 3),
    );
    if spec.pw_rigid {
        // 2x2 blocks; columns are x, y and z spans.
        let coords = Array2::from_shape_vec(
            (4, 6),
            vec![
                0i64, 6, 0, 6, 0, 1, //
                0, 6, 4, 10, 0, 1, //
                4, 10, 0, 6, 0, 1, //
                4, 10, 4, 10, 0, 1,
            ],
        )
        .unwrap();
        add_member(w, skip, "motion_correction/coord_shifts_els", &coords);
        add_member(w, skip, "motion_correction/x_shifts_els", &series(spec.frames, 4, 4));
        add_member(w, skip, "motion_correction/y_shifts_els", &series(spec.frames, 4, 5));
    }

    add_member(w, skip, "estimates/C", &series(spec.components, spec.frames, 6));
    add_member(w, skip, "estimates/S", &series(spec.components, spec.frames, 7));
    add_member(w, skip, "estimates/F_dff", &series(spec.components, spec.frames, 8));

    writer.finish().unwrap();
}

/// EXTRACT output: suite2p registration under `suite2p/` plus the weights
/// archive with `masks` square cells.
pub fn write_extract_output(root: &Path, frames: usize, masks: usize) -> PathBuf {
    let mut plane = PlaneSpec::new(0, 0);
    plane.frames = frames;
    write_suite2p_output(&root.join("suite2p"), &[plane.clone()]);

    let spatial = Array3::from_shape_fn((plane.height, plane.width, masks), |(y, x, k)| {
        if y / 4 == k && x < 2 {
            1.0 + x as f32
        } else {
            0.0
        }
    });
    let temporal = series(frames, masks, 9);
    let mut writer = ArchiveWriter::create(&root.join("extract_output.npz")).unwrap();
    writer.add_array("spatial_weights", &spatial).unwrap();
    writer.add_array("temporal_weights", &temporal).unwrap();
    writer.finish().unwrap();
    root.to_path_buf()
}

pub fn scan_key() -> ScanKey {
    ScanKey::new("subject1", "session1", 1)
}

pub fn scan_metadata(frames: usize, fields: usize) -> ScanMetadata {
    ScanMetadata {
        frame_count: frames,
        frame_rate: 30.0,
        channel_count: 1,
        nrois: 0,
        scan_dir: PathBuf::from(SCAN_DIR),
        fields: (0..fields)
            .map(|field_idx| FieldGeometry {
                field_idx,
                height: 16,
                width: 16,
                z: field_idx as f64 * 10.0,
            })
            .collect(),
    }
}

pub fn scan_catalog(frames: usize, fields: usize) -> ScanCatalog {
    let mut catalog = ScanCatalog::new();
    catalog.insert(scan_key(), scan_metadata(frames, fields));
    catalog
}

/// In-memory pipeline rooted at `root`.
pub fn memory_context(root: &Path, scans: ScanCatalog) -> PipelineContext {
    let catalog = Catalog::new(Arc::new(MemoryStore::new()));
    PipelineContext::new(catalog, Arc::new(scans), DataRoots::new(root))
}

/// Conventional output directory of paramset `id` for the fixture scan.
pub fn output_dir(root: &Path, method: ProcessingMethod, id: u32) -> PathBuf {
    root.join(SCAN_DIR).join(format!("{}_{id}", method.as_str()))
}

/// Two suite2p planes (10 masks with 3 cells, 5 masks with 1 cell), a
/// registered parameter set and a generated load-mode task.
pub fn suite2p_scenario(root: &Path) -> (PipelineContext, TaskKey) {
    let frames = 20;
    write_suite2p_output(
        &output_dir(root, ProcessingMethod::Suite2p, 1),
        &[PlaneSpec::new(10, 3), PlaneSpec::new(5, 1)],
    );
    let ctx = memory_context(root, scan_catalog(frames, 2));
    ctx.catalog
        .insert_new_params(ProcessingMethod::Suite2p, 1, "default", json!({"tau": 1.0}))
        .unwrap();
    let task = ctx.generate_task(&scan_key(), 1).unwrap();
    (ctx, task.key)
}
