use std::time::Instant;
use flexi_logger::{ opt_format, LogSpecification, Logger };
use log::info;
use drt_bigsite::{ AssemblerConfig, BigSite, Integrals, OpKind, Side };

const N_SITES: usize = 8;
const N_BIG: usize = 6;
const HOP: f64 = 1.0;
const U: f64 = 4.0;

fn main() -> anyhow::Result<()> {
    let _logger = Logger::with(LogSpecification::debug())
        .format(opt_format)
        .start()?;

    let ints = Integrals::hubbard(N_SITES, HOP, U, false);
    let orb_sym = vec![0; N_SITES];
    let targets = BigSite::<Integrals>::target_quanta(Side::Left, N_BIG, 4, &orb_sym);
    let site = BigSite::new(
        &targets, Side::Left, N_BIG, &orb_sym, ints.clone(), AssemblerConfig::default())?;
    for (q, n) in site.basis() {
        info!("{}: {} state(s)", q, n);
    }

    let mut kinds = vec![OpKind::H];
    for i in N_BIG as u16..N_SITES as u16 {
        kinds.push(OpKind::R(i));
        kinds.push(OpKind::RD(i));
    }
    let t0 = Instant::now();
    let blocks = site.build_operators(&kinds)?;
    info!("built {} operator(s) in {:.3} s", blocks.len(), t0.elapsed().as_secs_f64());

    for block in blocks.iter() {
        let n_dense = block.sectors.iter().filter(|s| s.data.is_dense()).count();
        info!(
            "{}: {} sector(s) ({} dense), {} stored entries",
            block.kind, block.sectors.len(), n_dense, block.nnz(),
        );
    }

    // lowest diagonal element of H in every sector
    for s in blocks[0].sectors.iter() {
        let (n, _) = s.data.shape();
        let lowest = (0..n)
            .map(|i| s.data.get(i, i))
            .fold(f64::INFINITY, f64::min);
        info!("H {}: min diagonal = {:.6}", s.bra, lowest);
    }

    // the mirror image: a right big site over the last orbitals, with
    // complementary operators for the orbitals left of it
    let targets = BigSite::<Integrals>::target_quanta(Side::Right, N_BIG, 4, &orb_sym);
    let right = BigSite::new(
        &targets, Side::Right, N_BIG, &orb_sym, ints, AssemblerConfig::default())?;
    let kinds: Vec<OpKind> = (0..(N_SITES - N_BIG) as u16)
        .flat_map(|i| [OpKind::R(i), OpKind::RD(i)])
        .collect();
    let t0 = Instant::now();
    let blocks = right.build_operators(&kinds)?;
    info!(
        "right site: built {} operator(s) in {:.3} s, {} stored entries",
        blocks.len(), t0.elapsed().as_secs_f64(),
        blocks.iter().map(|b| b.nnz()).sum::<usize>(),
    );
    Ok(())
}
